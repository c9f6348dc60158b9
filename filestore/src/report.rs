//! User-visible diagnostics.
//!
//! Buffered files and the chunk merge speak to the user through an injected
//! [`Reporter`]. Internal traces go to `tracing` directly.

use parking_lot::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Plain text, no source prefix
    SimpleMessage,
    Message,
    Warning,
    Error,
}

/// Sink for diagnostics tied to an object, usually a file name.
pub trait Reporter: Send + Sync {
    fn report(&self, severity: Severity, source: &str, text: &str);
}

/// Forwards every report to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, severity: Severity, source: &str, text: &str) {
        match severity {
            Severity::SimpleMessage => info!("{text}"),
            Severity::Message => info!(source, "{text}"),
            Severity::Warning => warn!(source, "{text}"),
            Severity::Error => error!(source, "{text}"),
        }
    }
}

/// One collected report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub severity: Severity,
    pub source: String,
    pub text: String,
}

/// Keeps reports in memory, for tests and for callers that display them later.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<Report>>,
}

impl CollectingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Reports of severity `severity`, text only
    #[must_use]
    pub fn texts(&self, severity: Severity) -> Vec<String> {
        self.reports
            .lock()
            .iter()
            .filter(|report| report.severity == severity)
            .map(|report| report.text.clone())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, severity: Severity, source: &str, text: &str) {
        self.reports.lock().push(Report {
            severity,
            source: source.to_string(),
            text: text.to_string(),
        });
    }
}
