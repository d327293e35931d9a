//! Call-site keyed counter registry
//!
//! At most one counter exists per [`CallSiteKey`], even when the first events
//! for a call site arrive on several threads at once.

use crate::config::KeyStrategy;
use crate::event::CallSite;
use crate::metrics::factory::{CounterFactory, CounterLabels};
use crate::metrics::naming::normalize_class_name;
use dashmap::DashMap;
use metrics::Counter;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallSiteKey {
    /// Hash of module path, file and line. Collisions are possible but negligible.
    Hashed(u64),
    /// Normalized module path plus line number.
    Located { class_name: String, line: u32 },
}

impl CallSiteKey {
    pub fn from_call_site(site: &CallSite<'_>, strategy: KeyStrategy) -> Self {
        match strategy {
            KeyStrategy::Hashed => {
                let mut hasher = DefaultHasher::new();
                site.class_name.hash(&mut hasher);
                site.file.hash(&mut hasher);
                site.line.hash(&mut hasher);
                CallSiteKey::Hashed(hasher.finish())
            }
            KeyStrategy::ClassAndLine => CallSiteKey::Located {
                class_name: normalize_class_name(site.class_name),
                line: site.line.unwrap_or(0),
            },
        }
    }
}

pub struct CounterRegistry {
    counters: DashMap<CallSiteKey, Counter>,
    factory: Arc<dyn CounterFactory>,
}

impl CounterRegistry {
    pub fn new(factory: Arc<dyn CounterFactory>) -> Self {
        Self {
            counters: DashMap::new(),
            factory,
        }
    }

    /// Returns the counter for `key`, creating and registering it on first use.
    ///
    /// `labels` is only evaluated when the key is new. The factory runs inside
    /// the map's insert-if-absent, so a racing caller never registers a second
    /// counter and every caller increments the counter that is actually stored.
    pub fn get_or_create<F>(&self, key: CallSiteKey, labels: F) -> Counter
    where
        F: FnOnce() -> CounterLabels,
    {
        if let Some(existing) = self.counters.get(&key) {
            return existing.value().clone();
        }

        self.counters
            .entry(key)
            .or_insert_with(|| self.factory.create_counter(&labels()))
            .value()
            .clone()
    }

    pub fn get(&self, key: &CallSiteKey) -> Option<Counter> {
        self.counters.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Test hook; production code never removes entries.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl fmt::Debug for CounterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterRegistry")
            .field("counters", &self.counters.len())
            .finish()
    }
}
