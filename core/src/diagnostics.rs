// Per-volume diagnostics sink
// Tolerated corruption (a BAAD record during a scan, a chain the resolver
// could not complete) is reported here instead of aborting the caller.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Object-safe sink for parse diagnostics. Supplied at volume construction;
/// the default forwards to the `log` facade.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, severity: Severity, context: &str, message: &str);
}

/// Default sink: forwards to `log::info!` / `log::warn!`.
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn report(&self, severity: Severity, context: &str, message: &str) {
        match severity {
            Severity::Info => log::info!("{}: {}", context, message),
            Severity::Warning => log::warn!("{}: {}", context, message),
        }
    }
}

/// Sink that drops everything. Useful for bulk scans where the caller
/// collects per-item results anyway.
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn report(&self, _severity: Severity, _context: &str, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingSink(Mutex<Vec<String>>);

    impl DiagnosticsSink for CollectingSink {
        fn report(&self, severity: Severity, context: &str, message: &str) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{}: {}: {}", severity, context, message));
        }
    }

    #[test]
    fn test_sink_object_safety() {
        let sink = CollectingSink(Mutex::new(Vec::new()));
        let dyn_sink: &dyn DiagnosticsSink = &sink;
        dyn_sink.report(Severity::Warning, "mft entry 12", "BAAD signature");
        assert_eq!(
            sink.0.lock().unwrap().as_slice(),
            &["warning: mft entry 12: BAAD signature".to_string()]
        );
    }
}
