//! Failure reporting.
//!
//! Every failed manager operation produces exactly one [`Diagnostic`]. The
//! default [`LogSink`] writes it as a `log::error!` record; tests and tools
//! install a [`RecordingSink`] to inspect failures afterwards.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::error::GraphicsError;

/// One failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Resource kind the operation tried to create or change.
    pub kind: &'static str,
    /// Debug label of the request, if any.
    pub label: Option<String>,
    pub error: GraphicsError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} '{}': {}", self.kind, label, self.error),
            None => write!(f, "{}: {}", self.kind, self.error),
        }
    }
}

/// Destination of failure diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

/// Writes diagnostics to the `log` facade at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, diagnostic: &Diagnostic) {
        log::error!("Failed to create {}", diagnostic);
    }
}

/// Ring buffer of diagnostics that also forwards to the log.
pub struct RecordingSink {
    entries: Mutex<VecDeque<Diagnostic>>,
    max_capacity: usize,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl RecordingSink {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_capacity.min(1024))),
            max_capacity: max_capacity.max(1),
        }
    }

    /// Snapshot of the recorded diagnostics, oldest first.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.entries.lock().iter().filter(|d| d.kind == kind).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        LogSink.report(diagnostic);
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_capacity {
            entries.pop_front();
        }
        entries.push_back(diagnostic.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostic(kind: &'static str) -> Diagnostic {
        Diagnostic {
            kind,
            label: Some("test".to_string()),
            error: GraphicsError::OutOfMemory,
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(diagnostic("buffer").to_string(), "buffer 'test': out of GPU memory");
        let unnamed = Diagnostic {
            label: None,
            ..diagnostic("sampler")
        };
        assert_eq!(unnamed.to_string(), "sampler: out of GPU memory");
    }

    #[test]
    fn test_recording_sink_is_bounded() {
        let sink = RecordingSink::new(2);
        sink.report(&diagnostic("a"));
        sink.report(&diagnostic("b"));
        sink.report(&diagnostic("c"));

        let kinds: Vec<_> = sink.entries().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec!["b", "c"]);
        assert_eq!(sink.count_kind("c"), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
