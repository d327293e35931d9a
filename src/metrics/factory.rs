use crate::event::Severity;
use crate::metrics::naming::MetricId;
use crate::metrics::store::{CounterKind, MetricStore};
use metrics::Counter;
use std::sync::Arc;

/// Logical group every error counter is registered under.
pub const ERRORS_METRIC_GROUP: &str = "errors";

/// Labels needed to create one error counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterLabels {
    pub subsystem: String,
    /// Already normalized class or module name.
    pub class_label: String,
    pub line: Option<u32>,
    pub severity: Severity,
}

impl CounterLabels {
    pub fn metric_id(&self) -> MetricId {
        MetricId {
            subsystem: self.subsystem.clone(),
            group: ERRORS_METRIC_GROUP,
            class_label: self.class_label.clone(),
            line: self.line,
            severity: self.severity,
        }
    }
}

/// Creates and registers counters with the metrics backend.
pub trait CounterFactory: Send + Sync {
    fn create_counter(&self, labels: &CounterLabels) -> Counter;
}

/// Registers counters into a [`MetricStore`].
#[derive(Debug, Clone)]
pub struct StoreCounterFactory {
    store: Arc<MetricStore>,
    kind: CounterKind,
}

impl StoreCounterFactory {
    pub fn new(store: Arc<MetricStore>, kind: CounterKind) -> Self {
        Self { store, kind }
    }
}

impl CounterFactory for StoreCounterFactory {
    fn create_counter(&self, labels: &CounterLabels) -> Counter {
        self.store.register_counter(labels.metric_id(), self.kind)
    }
}
