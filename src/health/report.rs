//! Health report types
//!
//! The report is the wire shape consumed by operators and monitoring;
//! serde field names match the health endpoint contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::GraphStats;

/// Result of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skipped",
        }
    }
}

/// Overall status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Engine unreachable; nothing beyond connectivity was attempted.
    Unavailable,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unavailable => "unavailable",
        }
    }
}

/// One check's outcome. `duration_ms` is present only on detailed runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl CheckResult {
    /// A check that never ran because an earlier one failed.
    pub fn skipped(name: &str, because: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Skipped,
            message: format!("skipped: {} failed", because),
            duration_ms: None,
        }
    }
}

/// Recovery-in-progress details included while a restore is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryProgress {
    pub backup_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub progress_percent: u8,
    pub target_instance: Option<String>,
}

/// Full health report for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub checks: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_stats: Option<GraphStats>,
    /// Name of the first failing check, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryProgress>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Messages of every failed check, for validation-error storage.
    pub fn failure_messages(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect()
    }
}
