use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use sb_runtime::{DisplaySink, Severity};

/// Writes display lines to stderr, keeping stdout for the line protocol.
#[derive(Debug, Default)]
pub(crate) struct ConsoleDisplaySink {
    errors: AtomicUsize,
}

impl ConsoleDisplaySink {
    pub(crate) fn error_count(&self) -> usize {
        self.errors.load(Ordering::Acquire)
    }
}

pub(crate) fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "INFO",
        Severity::Warning => "WARN",
        Severity::Error => "ERROR",
    }
}

impl DisplaySink for ConsoleDisplaySink {
    fn report(&self, severity: Severity, message: &str) {
        if severity == Severity::Error {
            self.errors.fetch_add(1, Ordering::AcqRel);
        }
        let mut stderr = std::io::stderr().lock();
        for line in message.lines() {
            let _ = writeln!(stderr, "[{}] {}", severity_label(severity), line);
        }
    }
}
