//! Structured JSON log events
//!
//! One event per line, built field by field and serialized with serde_json:
//! keys land in stable sorted order and escaping is the library's problem,
//! never ours. Fields keep their JSON types, so a gap is a number and a
//! redacted header map is an object. Errors route to stderr, everything
//! else to stdout, and writes are best-effort; a lost line never changes an
//! operation's outcome.

use std::io::{self, Write};

use serde_json::{Map, Value};

/// A log event under construction. The output stream is fixed by the
/// constructor; fields accumulate until [`LogEvent::emit`].
pub struct LogEvent {
    to_stderr: bool,
    record: Map<String, Value>,
}

/// Normal operations.
pub fn info(event: &str) -> LogEvent {
    LogEvent::new("INFO", false, event)
}

/// Recoverable oddities worth an operator's glance.
pub fn warn(event: &str) -> LogEvent {
    LogEvent::new("WARN", false, event)
}

/// Operation failures.
pub fn error(event: &str) -> LogEvent {
    LogEvent::new("ERROR", true, event)
}

/// Unrecoverable; the process is about to exit.
pub fn fatal(event: &str) -> LogEvent {
    LogEvent::new("FATAL", true, event)
}

impl LogEvent {
    fn new(level: &'static str, to_stderr: bool, event: &str) -> Self {
        let mut record = Map::new();
        record.insert("event".to_string(), Value::String(event.to_string()));
        record.insert("level".to_string(), Value::String(level.to_string()));
        record.insert(
            "ts".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        Self { to_stderr, record }
    }

    /// Attach one field. A later field with the same key wins.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.record.insert(key.to_string(), value.into());
        self
    }

    /// The serialized line, without the trailing newline.
    pub fn render(&self) -> String {
        Value::Object(self.record.clone()).to_string()
    }

    /// Write the event as one line to its stream.
    pub fn emit(self) {
        let LogEvent { to_stderr, record } = self;
        let mut line = Value::Object(record).to_string();
        line.push('\n');
        let _ = if to_stderr {
            io::stderr().write_all(line.as_bytes())
        } else {
            io::stdout().write_all(line.as_bytes())
        };
    }
}
