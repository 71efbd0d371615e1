//! Configuration
//!
//! Layered lowest-to-highest: built-in defaults, then an optional JSON
//! config file, then `GRAPHVAULT_*` environment variables. Every field
//! has a default so a bare `graphvault` invocation works out of the box.

mod errors;

pub use errors::{ConfigError, ConfigResult};

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::CheckTimeouts;
use crate::retention::{BackoffPolicy, RetentionPolicy};

/// Full configuration for the durability service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding backup artifacts and their metadata records.
    pub storage_dir: PathBuf,
    /// JSON-lines audit log file.
    pub audit_log: PathBuf,
    /// Five-field cron expression for scheduled backups.
    pub schedule: String,
    /// Actor recorded on audit entries written by this process.
    pub actor: String,
    /// Destination file for scheduler alerts; stderr when unset.
    pub alert_log: Option<PathBuf>,
    /// Gzip-compress backup artifacts.
    pub compression: bool,
    pub retention: RetentionPolicy,
    pub backoff: BackoffPolicy,
    /// Health check deadlines, in milliseconds.
    pub connectivity_timeout_ms: u64,
    pub schema_timeout_ms: u64,
    pub orphan_timeout_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let defaults = CheckTimeouts::default();
        Self {
            storage_dir: PathBuf::from("./graphvault/backups"),
            audit_log: PathBuf::from("./graphvault/audit.log"),
            schedule: "0 3 * * *".to_string(),
            actor: "graphvault".to_string(),
            alert_log: None,
            compression: true,
            retention: RetentionPolicy::default(),
            backoff: BackoffPolicy::default(),
            connectivity_timeout_ms: defaults.connectivity.as_millis() as u64,
            schema_timeout_ms: defaults.schema_consistency.as_millis() as u64,
            orphan_timeout_ms: defaults.orphan_detection.as_millis() as u64,
        }
    }
}

impl VaultConfig {
    /// Loads configuration: defaults, then `path` if given, then the
    /// environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Parses a JSON config file. Absent fields fall back to defaults.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Overlays `GRAPHVAULT_*` environment variables.
    fn apply_env(&mut self) -> ConfigResult<()> {
        if let Ok(dir) = env::var("GRAPHVAULT_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("GRAPHVAULT_AUDIT_LOG") {
            self.audit_log = PathBuf::from(path);
        }
        if let Ok(schedule) = env::var("GRAPHVAULT_SCHEDULE") {
            self.schedule = schedule;
        }
        if let Ok(actor) = env::var("GRAPHVAULT_ACTOR") {
            self.actor = actor;
        }
        if let Ok(path) = env::var("GRAPHVAULT_ALERT_LOG") {
            self.alert_log = Some(PathBuf::from(path));
        }
        if let Ok(raw) = env::var("GRAPHVAULT_COMPRESSION") {
            self.compression = parse_bool("GRAPHVAULT_COMPRESSION", &raw)?;
        }
        if let Ok(raw) = env::var("GRAPHVAULT_KEEP_DAILY") {
            self.retention.keep_daily = parse_number("GRAPHVAULT_KEEP_DAILY", &raw)?;
        }
        if let Ok(raw) = env::var("GRAPHVAULT_KEEP_WEEKLY") {
            self.retention.keep_weekly = parse_number("GRAPHVAULT_KEEP_WEEKLY", &raw)?;
        }
        Ok(())
    }

    /// Health check deadlines as durations.
    pub fn check_timeouts(&self) -> CheckTimeouts {
        CheckTimeouts {
            connectivity: Duration::from_millis(self.connectivity_timeout_ms),
            schema_consistency: Duration::from_millis(self.schema_timeout_ms),
            orphan_detection: Duration::from_millis(self.orphan_timeout_ms),
        }
    }
}

fn parse_bool(var: &'static str, raw: &str) -> ConfigResult<bool> {
    match raw {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            expected: "one of 1/0/true/false/yes/no",
        }),
    }
}

fn parse_number(var: &'static str, raw: &str) -> ConfigResult<usize> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
        expected: "a non-negative integer",
    })
}
