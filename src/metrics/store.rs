//! In-process metrics backend
//!
//! Owns every registered counter cell and hands out `metrics::Counter`
//! handles backed by them. The publisher scrapes the store through
//! [`MetricStore::snapshot`].

use crate::metrics::naming::MetricId;
use dashmap::DashMap;
use metrics::{Counter, CounterFn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterKind {
    /// Read-and-zero on every scrape; each publish carries the delta for one interval.
    #[default]
    Resetting,
    /// Never reset; each publish carries the running total.
    Cumulative,
}

#[derive(Debug)]
struct CounterCell {
    value: AtomicU64,
    kind: CounterKind,
}

impl CounterCell {
    fn new(kind: CounterKind) -> Self {
        Self {
            value: AtomicU64::new(0),
            kind,
        }
    }

    fn scrape(&self) -> u64 {
        match self.kind {
            CounterKind::Resetting => self.value.swap(0, Ordering::AcqRel),
            CounterKind::Cumulative => self.value.load(Ordering::Acquire),
        }
    }
}

impl CounterFn for CounterCell {
    fn increment(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.value.fetch_max(value, Ordering::Relaxed);
    }
}

/// One counter reading taken during a scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    pub path: String,
    pub value: u64,
}

#[derive(Debug, Default)]
pub struct MetricStore {
    counters: DashMap<MetricId, Arc<CounterCell>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a counter, or returns a handle to the one already
    /// registered under `id`. The kind of an existing counter is kept.
    pub fn register_counter(&self, id: MetricId, kind: CounterKind) -> Counter {
        let cell = self
            .counters
            .entry(id)
            .or_insert_with(|| Arc::new(CounterCell::new(kind)))
            .value()
            .clone();
        Counter::from_arc(cell)
    }

    /// Reads every counter, zeroing the resetting ones. Sorted by path.
    pub fn snapshot(&self) -> Vec<CounterSample> {
        let mut samples: Vec<CounterSample> = self
            .counters
            .iter()
            .map(|entry| CounterSample {
                path: entry.key().path(),
                value: entry.value().scrape(),
            })
            .collect();
        samples.sort_by(|a, b| a.path.cmp(&b.path));
        samples
    }

    /// Current value without resetting it.
    pub fn peek(&self, id: &MetricId) -> Option<u64> {
        self.counters
            .get(id)
            .map(|cell| cell.value.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drops every registered counter. Outstanding handles keep working but are
    /// no longer scraped.
    pub fn clear(&self) {
        self.counters.clear();
    }
}
