//! Metric naming for the Graphite path hierarchy
//!
//! Graphite splits paths on `.`, so every label that ends up inside a path
//! is first normalized into a single dash-separated segment.

use crate::event::Severity;
use std::fmt;

/// Turns a class or module path into a single metrics-safe segment.
///
/// Idempotent: normalizing an already normalized name returns it unchanged.
pub fn normalize_class_name(name: &str) -> String {
    name.replace("::", "-")
        .chars()
        .map(|c| match c {
            '.' | ':' | '/' | '\\' | ' ' => '-',
            other => other,
        })
        .collect()
}

/// Identity of a counter in the metrics backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId {
    pub subsystem: String,
    pub group: &'static str,
    pub class_label: String,
    pub line: Option<u32>,
    pub severity: Severity,
}

impl MetricId {
    /// `[<subsystem>.]<group>.<class>[.<line>].<SEVERITY>`
    pub fn path(&self) -> String {
        let mut path = String::new();
        if !self.subsystem.is_empty() {
            path.push_str(&normalize_class_name(&self.subsystem));
            path.push('.');
        }
        path.push_str(self.group);
        path.push('.');
        path.push_str(&normalize_class_name(&self.class_label));
        if let Some(line) = self.line {
            path.push('.');
            path.push_str(&line.to_string());
        }
        path.push('.');
        path.push_str(self.severity.as_str());
        path
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
