//! Structured JSON logger
//!
//! One log line = one event. Keys are emitted in a fixed order (`event`,
//! `severity`, `ts`, then fields sorted alphabetically) so log output is
//! deterministic and diffable.

use std::fmt;
use std::io::{self, Write};

use chrono::Utc;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Debug-level detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures and integrity faults
    Error = 3,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Synchronous structured logger
pub struct Logger;

impl Logger {
    /// Log an event to stdout.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = Self::render(severity, event, fields);
        let _ = writeln!(io::stdout(), "{}", line);
    }

    /// Log an event to stderr (errors, alerts).
    pub fn log_stderr(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = Self::render(severity, event, fields);
        let _ = writeln!(io::stderr(), "{}", line);
    }

    fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(256);
        out.push('{');

        out.push_str("\"event\":\"");
        escape_into(&mut out, event);
        out.push('"');

        out.push_str(",\"severity\":\"");
        out.push_str(severity.as_str());
        out.push('"');

        out.push_str(",\"ts\":\"");
        out.push_str(&Utc::now().to_rfc3339());
        out.push('"');

        let mut sorted: Vec<_> = fields.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);

        for (key, value) in sorted {
            out.push_str(",\"");
            escape_into(&mut out, key);
            out.push_str("\":\"");
            escape_into(&mut out, value);
            out.push('"');
        }

        out.push('}');
        out
    }
}

fn escape_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
}
