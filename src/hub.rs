//! Process-wide metric state shared by every appender instance.
//!
//! All appenders feeding the same hub register into one [`MetricStore`] and
//! share a single publisher. The first appender to start it brings it up; it
//! keeps running until the last started appender releases it.

use crate::config::PublisherConfig;
use crate::error::Result;
use crate::metrics::MetricStore;
use crate::publish::{GraphitePublisher, Publisher, PublisherLifecycle};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::runtime::Handle;
use tracing::debug;

type MakePublisher =
    Box<dyn Fn(Arc<MetricStore>, Option<&Handle>) -> Arc<dyn Publisher> + Send + Sync>;

static GLOBAL_HUB: OnceLock<Arc<MetricsHub>> = OnceLock::new();

pub struct MetricsHub {
    store: Arc<MetricStore>,
    lifecycle: PublisherLifecycle,
    make_publisher: MakePublisher,
    /// Appenders currently holding the publisher.
    users: Mutex<usize>,
}

impl MetricsHub {
    /// A hub that publishes to Graphite.
    pub fn new() -> Self {
        Self::with_publisher(|store, runtime| -> Arc<dyn Publisher> {
            match runtime {
                Some(handle) => Arc::new(GraphitePublisher::with_runtime(store, handle.clone())),
                None => Arc::new(GraphitePublisher::new(store)),
            }
        })
    }

    pub fn with_publisher<F>(make_publisher: F) -> Self
    where
        F: Fn(Arc<MetricStore>, Option<&Handle>) -> Arc<dyn Publisher> + Send + Sync + 'static,
    {
        Self {
            store: Arc::new(MetricStore::new()),
            lifecycle: PublisherLifecycle::new(),
            make_publisher: Box::new(make_publisher),
            users: Mutex::new(0),
        }
    }

    /// The hub appenders use unless given one explicitly.
    pub fn global() -> Arc<MetricsHub> {
        GLOBAL_HUB
            .get_or_init(|| Arc::new(MetricsHub::new()))
            .clone()
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Registers one more user of the shared publisher, starting it if it is not running.
    ///
    /// Returns `true` only for the call that actually started it; the config of
    /// every later call is ignored. A failed start registers nothing.
    pub fn acquire_publisher(
        &self,
        config: &PublisherConfig,
        runtime: Option<&Handle>,
    ) -> Result<bool> {
        let mut users = self.lock_users();
        let started = self.lifecycle.ensure_started(config, || {
            (self.make_publisher)(self.store.clone(), runtime)
        })?;
        *users += 1;
        Ok(started)
    }

    /// Drops one user; the publisher is stopped when none remain.
    pub fn release_publisher(&self) {
        let mut users = self.lock_users();
        match *users {
            0 => debug!("Publisher released with no registered users"),
            1 => {
                *users = 0;
                self.lifecycle.stop();
            }
            _ => *users -= 1,
        }
    }

    /// Stops the publisher regardless of how many users hold it.
    pub fn stop_publishing(&self) {
        let mut users = self.lock_users();
        *users = 0;
        self.lifecycle.stop();
    }

    pub fn is_publishing(&self) -> bool {
        self.lifecycle.is_started()
    }

    fn lock_users(&self) -> MutexGuard<'_, usize> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MetricsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetricsHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsHub")
            .field("counters", &self.store.len())
            .field("users", &*self.lock_users())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
