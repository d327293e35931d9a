use crate::config::PublisherConfig;
use crate::error::Result;
use crate::publish::Publisher;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

const IDLE: u8 = 0;
/// A start or a stop is in progress.
const BUSY: u8 = 1;
const RUNNING: u8 = 2;

/// Guards start-at-most-once semantics for the background publisher.
///
/// The right to start is claimed with a single compare-and-swap from idle.
/// Only the caller that wins the claim builds and starts a publisher; every
/// other caller returns without doing so. A failed start or a stop returns the
/// lifecycle to idle, so a later call can start a fresh publisher.
pub struct PublisherLifecycle {
    state: AtomicU8,
    publisher: Mutex<Option<Arc<dyn Publisher>>>,
}

impl PublisherLifecycle {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            publisher: Mutex::new(None),
        }
    }

    /// Returns `true` when this call claimed the lifecycle and started the publisher.
    ///
    /// When the winning start fails its error is returned and the lifecycle is
    /// left idle.
    pub fn ensure_started<F>(&self, config: &PublisherConfig, make_publisher: F) -> Result<bool>
    where
        F: FnOnce() -> Arc<dyn Publisher>,
    {
        if self
            .state
            .compare_exchange(IDLE, BUSY, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Metric publisher already running or starting");
            return Ok(false);
        }

        let publisher = make_publisher();
        if let Err(e) = publisher.start(config) {
            self.state.store(IDLE, Ordering::Release);
            warn!(address = %config.address(), "Metric publisher failed to start: {}", e);
            return Err(e);
        }

        *self.lock_publisher() = Some(publisher);
        self.state.store(RUNNING, Ordering::Release);
        info!(
            address = %config.address(),
            poll_interval_secs = config.poll_interval.as_secs(),
            queue_size = config.queue_size,
            send_as_rate = config.send_as_rate,
            "Metric publishing started"
        );
        Ok(true)
    }

    /// Stops the running publisher and returns to idle. No-op when nothing runs.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(RUNNING, BUSY, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let publisher = self.lock_publisher().take();
        if let Some(publisher) = publisher {
            publisher.stop();
        }
        self.state.store(IDLE, Ordering::Release);
        info!("Metric publishing stopped");
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    fn lock_publisher(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn Publisher>>> {
        self.publisher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PublisherLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PublisherLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherLifecycle")
            .field("started", &self.is_started())
            .finish()
    }
}
