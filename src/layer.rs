//! `tracing` integration.

use crate::dispatch::{ErrorDispatcher, INTERNAL_LOG_TARGET};
use crate::event::{CallSite, LogEvent, Severity};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Boolean event field that upgrades an ERROR event to FATAL: `error!(fatal = true, ...)`.
pub const FATAL_FIELD: &str = "fatal";

/// Counts ERROR/FATAL events per call site.
#[derive(Debug, Clone)]
pub struct ErrorCountingLayer {
    dispatcher: Arc<ErrorDispatcher>,
}

impl ErrorCountingLayer {
    pub fn new(dispatcher: Arc<ErrorDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl<S: Subscriber> Layer<S> for ErrorCountingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(INTERNAL_LOG_TARGET) {
            return;
        }

        let mut severity = Severity::from(metadata.level());
        if !severity.is_countable() {
            return;
        }
        if is_fatal(event) {
            severity = Severity::Fatal;
        }

        let call_site = metadata.module_path().map(|module_path| CallSite {
            class_name: module_path,
            file: metadata.file(),
            line: metadata.line(),
        });

        self.dispatcher.on_event(&LogEvent {
            severity,
            call_site,
            logger: metadata.target(),
        });
    }
}

fn is_fatal(event: &Event<'_>) -> bool {
    if event.metadata().fields().field(FATAL_FIELD).is_none() {
        return false;
    }
    let mut visitor = FatalFlag(false);
    event.record(&mut visitor);
    visitor.0
}

struct FatalFlag(bool);

impl Visit for FatalFlag {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == FATAL_FIELD {
            self.0 = value;
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
}
