//! Structured host-logger contract.
//!
//! The sandbox, plugin shell, and matcher compiler all accept an optional
//! logger that they call fire-and-forget with structured, JSONL-friendly
//! records, rather than routing through a process-global logging
//! framework — a logger here is a per-plugin collaborator, not ambient
//! diagnostics.

use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// Severity level for a log record. Ordering matches the C source's
/// `lsb_log_level` enum (`debug` < `info` < `warning` < `error`), extended
/// with `Trace`/`Fatal` the way a structured-logging `LogLevel`
/// does for finer-grained test/e2e output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// One structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord<'a> {
    pub level: LogLevel,
    /// Which component emitted the record (`"sandbox"`, `"plugin"`, ...).
    pub component: &'a str,
    pub message: String,
    /// Free-form structured fields (quota readings, discarded-byte counts).
    #[serde(skip_serializing_if = "Value::is_null")]
    pub fields: Value,
}

/// A sink for [`LogRecord`]s. Implementations must not panic and must not
/// block indefinitely — a logger is invoked from inside sandbox/plugin hot
/// paths and a wedged logger would wedge the host.
pub trait Logger: Send + Sync {
    fn log(&self, record: LogRecord<'_>);
}

/// The default logger: discards every record. Used when a plugin is
/// constructed with no logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _record: LogRecord<'_>) {}
}

/// Writes one JSON object per line to stderr, used by `heka-cli` and by
/// tests that want to assert on emitted diagnostics.
#[derive(Debug, Default)]
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, record: LogRecord<'_>) {
        if let Ok(line) = serde_json::to_string(&record) {
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingLogger(Mutex<Vec<String>>);

    impl Logger for CollectingLogger {
        fn log(&self, record: LogRecord<'_>) {
            self.0.lock().unwrap().push(record.message);
        }
    }

    #[test]
    fn null_logger_accepts_any_record() {
        let logger = NullLogger;
        logger.log(LogRecord {
            level: LogLevel::Error,
            component: "sandbox",
            message: "instruction_limit exceeded".into(),
            fields: Value::Null,
        });
    }

    #[test]
    fn collecting_logger_observes_message() {
        let logger = CollectingLogger::default();
        logger.log(LogRecord {
            level: LogLevel::Warn,
            component: "framer",
            message: "discarded bytes resyncing".into(),
            fields: serde_json::json!({ "discarded": 8 }),
        });
        assert_eq!(logger.0.lock().unwrap().as_slice(), ["discarded bytes resyncing"]);
    }
}
