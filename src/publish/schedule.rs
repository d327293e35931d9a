//! Cancellable background tasks
//!
//! Each task runs either on a caller-supplied tokio runtime or on its own
//! named thread that owns a current-thread runtime, so the publisher and the
//! heartbeat never share a scheduler unless a caller asks for it.

use crate::error::{GraphiteError, Result};
use std::future::Future;
use std::thread;
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Handed to a background future; resolves once the owning task is stopped or dropped.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// A shutdown signal and the sender that raises it.
    pub fn pair() -> (watch::Sender<bool>, Self) {
        let (stop, rx) = watch::channel(false);
        (stop, Self { rx })
    }

    pub async fn requested(&mut self) {
        // An error means the sender is gone, which is a shutdown as well.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    stop: watch::Sender<bool>,
}

impl BackgroundTask {
    pub fn spawn<F, Fut>(name: &str, runtime: Option<&Handle>, make: F) -> Result<Self>
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, shutdown) = Shutdown::pair();
        let future = make(shutdown);

        match runtime {
            Some(handle) => {
                handle.spawn(future);
            }
            None => {
                let thread_name = name.to_string();
                thread::Builder::new()
                    .name(thread_name.clone())
                    .spawn(move || {
                        match Builder::new_current_thread().enable_all().build() {
                            Ok(runtime) => runtime.block_on(future),
                            Err(e) => {
                                warn!(task = %thread_name, "Failed to build background runtime: {}", e)
                            }
                        }
                    })
                    .map_err(|e| GraphiteError::PublisherStart(format!("{name}: {e}")))?;
            }
        }

        debug!(task = name, "Background task spawned");
        Ok(Self {
            name: name.to_string(),
            stop,
        })
    }

    /// Runs `tick` every `period`; the first run is immediate when `immediate` is set.
    ///
    /// A zero `period` is rejected before anything is spawned.
    pub fn periodic<F>(
        name: &str,
        runtime: Option<&Handle>,
        period: Duration,
        immediate: bool,
        tick: F,
    ) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(GraphiteError::Config(format!(
                "{name}: period must not be zero"
            )));
        }
        Self::spawn(name, runtime, move |mut shutdown| async move {
            let mut tick = tick;
            let first = if immediate {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut ticker = time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => break,
                    _ = ticker.tick() => tick(),
                }
            }
        })
    }

    #[cfg(test)]
    fn name(&self) -> &str {
        &self.name
    }

    /// Idempotent. The task exits the next time it is polled.
    pub fn stop(&self) {
        if !self.stop.send_replace(true) {
            debug!(task = %self.name, "Background task stop requested");
        }
    }

    #[cfg(test)]
    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}
