//! Error counters
//!
//! Naming, the in-process backend the publisher scrapes, the factory seam
//! used to create counters, and the registry that maps call sites to them.

pub mod factory;
pub mod naming;
pub mod registry;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use factory::{CounterFactory, CounterLabels, StoreCounterFactory, ERRORS_METRIC_GROUP};
pub use naming::{normalize_class_name, MetricId};
pub use registry::{CallSiteKey, CounterRegistry};
pub use store::{CounterKind, CounterSample, MetricStore};
