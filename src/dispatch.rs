//! Severity filter and call-site dispatch into the counter registry.

use crate::config::KeyStrategy;
use crate::event::{CallSite, LogEvent, Severity};
use crate::metrics::{normalize_class_name, CallSiteKey, CounterLabels, CounterRegistry};
use metrics::Counter;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

/// Target of this crate's own diagnostics. Events with this target are never counted.
pub const INTERNAL_LOG_TARGET: &str = "graphite_error_counter::internal";

/// Receives anomalies found while counting.
pub trait DiagnosticSink: Send + Sync {
    fn missing_call_site(&self, logger: &str, severity: Severity);
}

/// Reports through `tracing` under [`INTERNAL_LOG_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn missing_call_site(&self, logger: &str, severity: Severity) {
        tracing::error!(
            target: INTERNAL_LOG_TARGET,
            logger,
            severity = %severity,
            "No call site found for {} event from logger [{}]; event not counted",
            severity,
            logger
        );
    }
}

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside `on_event` until dropped.
struct ReentrancyGuard;

impl ReentrancyGuard {
    fn enter() -> Option<Self> {
        DISPATCHING
            .try_with(|dispatching| (!dispatching.replace(true)).then(|| ReentrancyGuard))
            .ok()
            .flatten()
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        let _ = DISPATCHING.try_with(|dispatching| dispatching.set(false));
    }
}

pub struct ErrorDispatcher {
    registry: Arc<CounterRegistry>,
    subsystem: String,
    key_strategy: KeyStrategy,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl ErrorDispatcher {
    pub fn new(
        registry: Arc<CounterRegistry>,
        subsystem: impl Into<String>,
        key_strategy: KeyStrategy,
    ) -> Self {
        Self {
            registry,
            subsystem: subsystem.into(),
            key_strategy,
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn registry(&self) -> &Arc<CounterRegistry> {
        &self.registry
    }

    /// Counts `event` if it is ERROR or FATAL. Returns whether a counter was incremented.
    ///
    /// Never panics and never fails: an event without a call site is reported to
    /// the diagnostic sink and dropped. Events raised while this thread is already
    /// inside `on_event` are ignored.
    pub fn on_event(&self, event: &LogEvent<'_>) -> bool {
        if !event.severity.is_countable() {
            return false;
        }
        let Some(_guard) = ReentrancyGuard::enter() else {
            return false;
        };

        match event.call_site {
            Some(ref site) => {
                self.counter_for(event.severity, site).increment(1);
                true
            }
            None => {
                self.diagnostics
                    .missing_call_site(event.logger, event.severity);
                false
            }
        }
    }

    fn counter_for(&self, severity: Severity, site: &CallSite<'_>) -> Counter {
        let key = CallSiteKey::from_call_site(site, self.key_strategy);
        self.registry.get_or_create(key, || CounterLabels {
            subsystem: self.subsystem.clone(),
            class_label: normalize_class_name(site.class_name),
            line: match self.key_strategy {
                KeyStrategy::ClassAndLine => site.line,
                KeyStrategy::Hashed => None,
            },
            severity,
        })
    }
}

impl fmt::Debug for ErrorDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorDispatcher")
            .field("subsystem", &self.subsystem)
            .field("key_strategy", &self.key_strategy)
            .field("registry", &self.registry)
            .finish()
    }
}
