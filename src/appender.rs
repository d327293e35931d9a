//! The error-counting appender
//!
//! Wires configuration, the counter registry, the shared publisher and the
//! heartbeat together and exposes the result as a `tracing` layer.

use crate::config::AppenderConfig;
use crate::dispatch::{DiagnosticSink, ErrorDispatcher};
use crate::error::Result;
use crate::heartbeat::StartupHeartbeat;
use crate::hub::MetricsHub;
use crate::layer::ErrorCountingLayer;
use crate::metrics::{CounterFactory, CounterKind, CounterRegistry, StoreCounterFactory};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

pub struct ErrorMetricsAppender {
    config: AppenderConfig,
    hub: Arc<MetricsHub>,
    dispatcher: Arc<ErrorDispatcher>,
    heartbeat: Option<StartupHeartbeat>,
    runtime: Option<Handle>,
    started: AtomicBool,
}

impl ErrorMetricsAppender {
    /// Builds an appender on the process-wide hub.
    pub fn new(config: AppenderConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Builds an appender from plugin-style string attributes.
    pub fn from_attributes<I, K, V>(attributes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::new(AppenderConfig::from_attributes(attributes)?)
    }

    pub fn builder(config: AppenderConfig) -> AppenderBuilder {
        AppenderBuilder {
            config,
            hub: None,
            counter_factory: None,
            diagnostics: None,
            runtime: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AppenderConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<MetricsHub> {
        &self.hub
    }

    pub fn dispatcher(&self) -> &Arc<ErrorDispatcher> {
        &self.dispatcher
    }

    /// A layer feeding this appender. Cheap to clone; install it on any subscriber.
    pub fn layer(&self) -> ErrorCountingLayer {
        ErrorCountingLayer::new(self.dispatcher.clone())
    }

    /// Starts the shared publisher (first caller wins) and this appender's heartbeat.
    ///
    /// Calling it again while started is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!(appender = %self.config.name, "Appender already started");
            return Ok(());
        }

        let publisher_started = match self
            .hub
            .acquire_publisher(&self.config.publisher(), self.runtime.as_ref())
        {
            Ok(started) => started,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };

        if let Err(e) = self.start_heartbeat() {
            self.hub.release_publisher();
            self.started.store(false, Ordering::Release);
            return Err(e);
        }

        info!(
            appender = %self.config.name,
            subsystem = %self.config.subsystem,
            publisher_started,
            "Error metrics appender started"
        );
        Ok(())
    }

    fn start_heartbeat(&self) -> Result<()> {
        match (&self.heartbeat, &self.runtime) {
            (Some(heartbeat), Some(handle)) => heartbeat.start_on(handle),
            (Some(heartbeat), None) => heartbeat.start(),
            (None, _) => Ok(()),
        }
    }

    /// Stops this appender's heartbeat and releases the shared publisher, which
    /// stops once no started appender holds it. No-op when not started.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.stop();
        }
        self.hub.release_publisher();
        info!(appender = %self.config.name, "Error metrics appender stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ErrorMetricsAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorMetricsAppender")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("heartbeat", &self.heartbeat.is_some())
            .field("started", &self.is_started())
            .finish()
    }
}

pub struct AppenderBuilder {
    config: AppenderConfig,
    hub: Option<Arc<MetricsHub>>,
    counter_factory: Option<Arc<dyn CounterFactory>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    runtime: Option<Handle>,
}

impl AppenderBuilder {
    pub fn hub(mut self, hub: Arc<MetricsHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Replaces the hub's store as the place counters are created.
    pub fn counter_factory(mut self, factory: Arc<dyn CounterFactory>) -> Self {
        self.counter_factory = Some(factory);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Runs the publisher and heartbeat on this runtime instead of dedicated threads.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<ErrorMetricsAppender> {
        self.config.validate()?;

        let hub = self.hub.unwrap_or_else(MetricsHub::global);
        let kind = if self.config.resetting {
            CounterKind::Resetting
        } else {
            CounterKind::Cumulative
        };
        let factory = self
            .counter_factory
            .unwrap_or_else(|| -> Arc<dyn CounterFactory> {
                Arc::new(StoreCounterFactory::new(hub.store().clone(), kind))
            });

        let registry = Arc::new(CounterRegistry::new(factory.clone()));
        let mut dispatcher = ErrorDispatcher::new(
            registry,
            self.config.subsystem.clone(),
            self.config.key_strategy,
        );
        if let Some(diagnostics) = self.diagnostics {
            dispatcher = dispatcher.with_diagnostics(diagnostics);
        }

        let heartbeat = self.config.heartbeat.enabled.then(|| {
            StartupHeartbeat::new(factory.as_ref(), &self.config.subsystem, &self.config.heartbeat)
        });

        Ok(ErrorMetricsAppender {
            config: self.config,
            hub,
            dispatcher: Arc::new(dispatcher),
            heartbeat,
            runtime: self.runtime,
            started: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeartbeatConfig, PublisherConfig};
    use crate::error::GraphiteError;
    use crate::metrics::testing::RecordingFactory;
    use crate::publish::Publisher;
    use std::sync::atomic::AtomicUsize;
    use tracing_subscriber::prelude::*;

    #[derive(Default)]
    struct Calls {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    struct CountingPublisher(Arc<Calls>);

    impl Publisher for CountingPublisher {
        fn start(&self, _config: &PublisherConfig) -> Result<()> {
            self.0.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.0.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_hub() -> (Arc<MetricsHub>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let counted = calls.clone();
        let hub = MetricsHub::with_publisher(move |_, _| -> Arc<dyn Publisher> {
            Arc::new(CountingPublisher(counted.clone()))
        });
        (Arc::new(hub), calls)
    }

    fn quiet_config() -> AppenderConfig {
        AppenderConfig {
            subsystem: "billing".to_string(),
            heartbeat: HeartbeatConfig {
                enabled: false,
                ..HeartbeatConfig::default()
            },
            ..AppenderConfig::default()
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = AppenderConfig {
            port: 0,
            ..AppenderConfig::default()
        };
        let err = ErrorMetricsAppender::builder(config)
            .hub(Arc::new(MetricsHub::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphiteError::Config(_)));
    }

    #[test]
    fn test_from_attributes_sets_name() {
        let appender =
            ErrorMetricsAppender::from_attributes([("name", "Errors"), ("heartbeatenabled", "false")])
                .unwrap();
        assert_eq!(appender.name(), "Errors");
        assert!(Arc::ptr_eq(appender.hub(), &MetricsHub::global()));
    }

    #[test]
    fn test_layer_counts_into_hub_store() {
        let hub = Arc::new(MetricsHub::new());
        let appender = ErrorMetricsAppender::builder(quiet_config())
            .hub(hub.clone())
            .build()
            .unwrap();

        let subscriber = tracing_subscriber::registry().with(appender.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("charge failed");
            tracing::info!("charge retried");
        });

        let samples = hub.store().snapshot();
        assert_eq!(samples.len(), 1);
        assert_eq!(
            samples[0].path,
            "billing.errors.graphite_error_counter-appender-tests.ERROR"
        );
        assert_eq!(samples[0].value, 1);
    }

    #[test]
    fn test_heartbeat_counter_created_when_enabled() {
        let factory = Arc::new(RecordingFactory::default());
        let appender = ErrorMetricsAppender::builder(AppenderConfig::default())
            .hub(Arc::new(MetricsHub::new()))
            .counter_factory(factory.clone())
            .build()
            .unwrap();

        let created = factory.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].class_label, "graphite_error_counter-heartbeat");
        assert!(appender.dispatcher().registry().is_empty());
    }

    #[test]
    fn test_stopping_one_appender_keeps_shared_publisher_running() {
        let (hub, calls) = counting_hub();
        let appender = |name: &str| {
            let config = AppenderConfig {
                name: name.to_string(),
                ..quiet_config()
            };
            ErrorMetricsAppender::builder(config)
                .hub(hub.clone())
                .build()
                .unwrap()
        };
        let (a, b, c) = (appender("a"), appender("b"), appender("c"));

        a.start().unwrap();
        b.start().unwrap();
        a.stop();
        a.stop();
        assert!(hub.is_publishing());
        assert_eq!(calls.stopped.load(Ordering::SeqCst), 0);

        b.stop();
        assert!(!hub.is_publishing());
        assert_eq!(calls.stopped.load(Ordering::SeqCst), 1);

        c.start().unwrap();
        assert!(hub.is_publishing());
        assert_eq!(calls.started.load(Ordering::SeqCst), 2);
        c.stop();
    }

    #[test]
    fn test_start_is_idempotent_per_appender() {
        let (hub, calls) = counting_hub();
        let appender = ErrorMetricsAppender::builder(quiet_config())
            .hub(hub.clone())
            .build()
            .unwrap();

        appender.start().unwrap();
        appender.start().unwrap();
        assert!(appender.is_started());
        assert_eq!(calls.started.load(Ordering::SeqCst), 1);

        // One stop releases the single hold.
        appender.stop();
        assert!(!appender.is_started());
        assert!(!hub.is_publishing());
    }
}
