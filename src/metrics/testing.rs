//! Recording doubles for the counter seam.

use crate::metrics::factory::{CounterFactory, CounterLabels};
use metrics::{Counter, CounterFn};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct RecordingCounter {
    total: AtomicU64,
    calls: AtomicUsize,
}

impl RecordingCounter {
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Number of increments, including increments by zero.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CounterFn for RecordingCounter {
    fn increment(&self, value: u64) {
        self.total.fetch_add(value, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn absolute(&self, value: u64) {
        self.total.store(value, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct RecordingFactory {
    created: Mutex<Vec<(CounterLabels, Arc<RecordingCounter>)>>,
}

impl RecordingFactory {
    pub fn created(&self) -> Vec<CounterLabels> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(labels, _)| labels.clone())
            .collect()
    }

    pub fn counter(&self, index: usize) -> Arc<RecordingCounter> {
        self.created.lock().unwrap()[index].1.clone()
    }
}

impl CounterFactory for RecordingFactory {
    fn create_counter(&self, labels: &CounterLabels) -> Counter {
        let counter = Arc::new(RecordingCounter::default());
        self.created
            .lock()
            .unwrap()
            .push((labels.clone(), counter.clone()));
        Counter::from_arc(counter)
    }
}
