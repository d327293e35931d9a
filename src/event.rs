//! The view of a log event that the counting path works with.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Exactly ERROR and FATAL are counted; this is a set, not a threshold.
    pub fn is_countable(self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    #[cfg(test)]
    fn all() -> [Severity; 6] {
        [
            Severity::Trace,
            Severity::Debug,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warn,
            _ => Severity::Error,
        }
    }
}

/// Where an event was emitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite<'a> {
    /// Module path of the emitting code (`a::b::c`).
    pub class_name: &'a str,
    pub file: Option<&'a str>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct LogEvent<'a> {
    pub severity: Severity,
    /// `None` when the logging framework could not tell where the event came from.
    pub call_site: Option<CallSite<'a>>,
    /// Identifies the logger; used only in diagnostics.
    pub logger: &'a str,
}
