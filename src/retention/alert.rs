//! Operator alerting
//!
//! Raised when scheduled backups keep failing after retries are
//! exhausted. Delivery is a seam: production wires the stderr log sink
//! or a file sink per the `alert_log` configuration, tests capture
//! alerts in memory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observability::{Logger, Severity};

/// A single operator-facing alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub message: String,
    /// How many scheduled runs in a row have failed.
    pub consecutive_failures: u32,
}

impl Alert {
    pub fn backup_failures(message: impl Into<String>, consecutive_failures: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            event: "scheduled_backup_failing".to_string(),
            message: message.into(),
            consecutive_failures,
        }
    }
}

/// Delivers alerts to an operator channel.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: &Alert);
}

/// Emits alerts as error-severity log events.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: &Alert) {
        Logger::log_stderr(
            Severity::Error,
            &alert.event,
            &[
                ("message", alert.message.as_str()),
                (
                    "consecutive_failures",
                    &alert.consecutive_failures.to_string(),
                ),
            ],
        );
    }
}

/// Appends alerts to a file as JSON lines, fsynced per alert. Chosen by
/// the `alert_log` configuration option.
pub struct FileAlertSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAlertSink {
    /// Opens the alert log for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl AlertSink for FileAlertSink {
    fn raise(&self, alert: &Alert) {
        let result = serde_json::to_string(alert)
            .map_err(io::Error::other)
            .and_then(|line| {
                let mut file = self
                    .file
                    .lock()
                    .map_err(|_| io::Error::other("alert log lock poisoned"))?;
                writeln!(file, "{}", line)?;
                file.sync_all()
            });
        if result.is_err() {
            // An undeliverable alert still has to reach someone.
            Logger::log_stderr(
                Severity::Error,
                &alert.event,
                &[
                    ("message", alert.message.as_str()),
                    ("alert_log", &self.path.display().to_string()),
                ],
            );
        }
    }
}

/// Captures alerts for assertions in tests.
#[derive(Default)]
pub struct MemoryAlertSink {
    raised: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raised(&self) -> Vec<Alert> {
        self.raised.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl AlertSink for MemoryAlertSink {
    fn raise(&self, alert: &Alert) {
        if let Ok(mut raised) = self.raised.lock() {
            raised.push(alert.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_captures_alerts() {
        let sink = MemoryAlertSink::new();
        sink.raise(&Alert::backup_failures("export keeps timing out", 3));

        let raised = sink.raised();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].consecutive_failures, 3);
        assert_eq!(raised[0].event, "scheduled_backup_failing");
    }

    #[test]
    fn test_file_sink_appends_json_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("alerts").join("alerts.log");
        let sink = FileAlertSink::open(&path).unwrap();

        sink.raise(&Alert::backup_failures("export keeps timing out", 2));
        sink.raise(&Alert::backup_failures("still failing", 3));

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: Alert = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last.consecutive_failures, 3);
        assert_eq!(last.message, "still failing");
    }

    #[test]
    fn test_file_sink_survives_reopening() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("alerts.log");

        FileAlertSink::open(&path)
            .unwrap()
            .raise(&Alert::backup_failures("first", 1));
        FileAlertSink::open(&path)
            .unwrap()
            .raise(&Alert::backup_failures("second", 2));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }
}
