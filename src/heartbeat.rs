//! Startup / liveness heartbeat
//!
//! Increments a dedicated counter immediately on start and then once per
//! period. The counter goes through the same store and publisher as the error
//! counters, so a process that dies or wedges stops refreshing it and its
//! absence in Graphite is the alert.

use crate::config::HeartbeatConfig;
use crate::error::Result;
use crate::event::Severity;
use crate::metrics::{normalize_class_name, CounterFactory, CounterLabels};
use crate::publish::BackgroundTask;
use metrics::Counter;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[derive(Clone)]
struct Pulse {
    counter: Counter,
    value: u64,
}

impl Pulse {
    fn emit(&self) {
        self.counter.increment(self.value);
    }
}

pub struct StartupHeartbeat {
    pulse: Pulse,
    period: Duration,
    task: Mutex<Option<BackgroundTask>>,
}

impl StartupHeartbeat {
    pub fn new(factory: &dyn CounterFactory, subsystem: &str, config: &HeartbeatConfig) -> Self {
        let counter = factory.create_counter(&CounterLabels {
            subsystem: subsystem.to_string(),
            class_label: normalize_class_name(module_path!()),
            line: None,
            severity: Severity::Error,
        });

        Self {
            pulse: Pulse {
                counter,
                value: config.value,
            },
            period: config.period(),
            task: Mutex::new(None),
        }
    }

    /// Starts emitting on a dedicated timer thread.
    pub fn start(&self) -> Result<()> {
        self.start_with(None)
    }

    /// Starts emitting on a task of the given runtime.
    pub fn start_on(&self, runtime: &Handle) -> Result<()> {
        self.start_with(Some(runtime))
    }

    fn start_with(&self, runtime: Option<&Handle>) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Ok(());
        }

        let pulse = self.pulse.clone();
        *task = Some(BackgroundTask::periodic(
            "graphite-heartbeat",
            runtime,
            self.period,
            true,
            move || pulse.emit(),
        )?);
        info!(period_secs = self.period.as_secs(), "Heartbeat started");
        Ok(())
    }

    pub fn emit(&self) {
        self.pulse.emit();
    }

    /// Idempotent; safe when never started.
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop();
            info!("Heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphiteError;
    use crate::metrics::testing::RecordingFactory;
    use tokio::time;

    fn config(value: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            enabled: true,
            period_seconds: 60,
            value,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_counter_labels() {
        let factory = RecordingFactory::default();
        StartupHeartbeat::new(&factory, "payments", &config(0));

        let labels = &factory.created()[0];
        assert_eq!(labels.subsystem, "payments");
        assert_eq!(labels.class_label, "graphite_error_counter-heartbeat");
        assert_eq!(labels.severity, Severity::Error);
        assert_eq!(labels.line, None);
    }

    #[test]
    fn test_emit_increments_by_sentinel() {
        let factory = RecordingFactory::default();
        let heartbeat = StartupHeartbeat::new(&factory, "", &config(0));
        heartbeat.emit();
        heartbeat.emit();

        let counter = factory.counter(0);
        assert_eq!(counter.calls(), 2);
        assert_eq!(counter.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_immediately_then_every_period_until_stopped() {
        let factory = RecordingFactory::default();
        let heartbeat = StartupHeartbeat::new(&factory, "", &config(1));
        let counter = factory.counter(0);

        heartbeat.start_on(&Handle::current()).unwrap();
        heartbeat.start_on(&Handle::current()).unwrap();
        settle().await;
        assert_eq!(counter.calls(), 1);

        time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(counter.calls(), 2);

        for _ in 0..2 {
            time::advance(Duration::from_secs(60)).await;
            settle().await;
        }
        assert_eq!(counter.calls(), 4);
        assert_eq!(counter.total(), 4);

        heartbeat.stop();
        assert!(!heartbeat.is_running());
        time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(counter.calls(), 4);
    }

    #[test]
    fn test_zero_period_is_rejected_on_start() {
        let factory = RecordingFactory::default();
        let config = HeartbeatConfig {
            period_seconds: 0,
            ..config(0)
        };
        let heartbeat = StartupHeartbeat::new(&factory, "", &config);

        let err = heartbeat.start().unwrap_err();
        assert!(matches!(err, GraphiteError::Config(_)));
        assert!(!heartbeat.is_running());
        assert_eq!(factory.counter(0).calls(), 0);
    }

    #[test]
    fn test_stop_is_idempotent_without_start() {
        let factory = RecordingFactory::default();
        let heartbeat = StartupHeartbeat::new(&factory, "", &config(0));
        heartbeat.stop();
        heartbeat.stop();
        assert!(!heartbeat.is_running());
    }
}
