//! Recovery state singleton
//!
//! Exactly one `RecoveryState` exists system-wide; it is the only mutable
//! shared object in this crate and is reached exclusively through the
//! state machine's methods. Readers get clones, never references into the
//! guarded value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the current (or most recent) recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStatus {
    NotRecovering,
    Recovering,
    Validation,
    RecoverySuccess,
    RecoveryFailed,
}

impl RecoveryStatus {
    /// Returns the status name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStatus::NotRecovering => "NOT_RECOVERING",
            RecoveryStatus::Recovering => "RECOVERING",
            RecoveryStatus::Validation => "VALIDATION",
            RecoveryStatus::RecoverySuccess => "RECOVERY_SUCCESS",
            RecoveryStatus::RecoveryFailed => "RECOVERY_FAILED",
        }
    }

    /// True while a recovery occupies the machine.
    pub fn is_active(&self) -> bool {
        !matches!(self, RecoveryStatus::NotRecovering)
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The current (or most recent) recovery operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryState {
    pub status: RecoveryStatus,
    pub backup_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percent: u8,
    pub target_instance: Option<String>,
    pub validation_errors: Vec<String>,
    pub promoted_to_production: bool,
    pub promoted_at: Option<DateTime<Utc>>,
}

impl RecoveryState {
    /// Bootstrap state: nothing recovering, nothing remembered.
    pub fn new() -> Self {
        Self {
            status: RecoveryStatus::NotRecovering,
            backup_id: None,
            started_at: None,
            completed_at: None,
            progress_percent: 0,
            target_instance: None,
            validation_errors: Vec::new(),
            promoted_to_production: false,
            promoted_at: None,
        }
    }

    /// Fresh state for a newly initialized recovery.
    pub(crate) fn begin(backup_id: &str, target: &str) -> Self {
        Self {
            status: RecoveryStatus::Recovering,
            backup_id: Some(backup_id.to_string()),
            started_at: Some(Utc::now()),
            completed_at: None,
            progress_percent: 0,
            target_instance: Some(target.to_string()),
            validation_errors: Vec::new(),
            promoted_to_production: false,
            promoted_at: None,
        }
    }
}

impl Default for RecoveryState {
    fn default() -> Self {
        Self::new()
    }
}
