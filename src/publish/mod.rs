//! Shipping counters to the remote collector.

pub mod graphite;
pub mod lifecycle;
pub mod schedule;

pub use graphite::GraphitePublisher;
pub use lifecycle::PublisherLifecycle;
pub use schedule::{BackgroundTask, Shutdown};

use crate::config::PublisherConfig;
use crate::error::Result;

/// A background loop that periodically ships every registered counter somewhere.
pub trait Publisher: Send + Sync {
    fn start(&self, config: &PublisherConfig) -> Result<()>;

    /// Must be a no-op when `start` was never called.
    fn stop(&self);
}
