pub mod appender;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod hub;
pub mod layer;
pub mod logging;
pub mod metrics;
pub mod publish;

pub use appender::{AppenderBuilder, ErrorMetricsAppender};
pub use config::{AppenderConfig, HeartbeatConfig, KeyStrategy, PublisherConfig};
pub use dispatch::{DiagnosticSink, ErrorDispatcher, TracingDiagnostics, INTERNAL_LOG_TARGET};
pub use error::{GraphiteError, Result};
pub use event::{CallSite, LogEvent, Severity};
pub use heartbeat::StartupHeartbeat;
pub use hub::MetricsHub;
pub use layer::{ErrorCountingLayer, FATAL_FIELD};
pub use logging::init_logging;
