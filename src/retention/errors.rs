//! Retention scheduler error types

use thiserror::Error;

use crate::backup::BackupError;

/// Result type for retention operations
pub type RetentionResult<T> = Result<T, RetentionError>;

/// Errors raised by the retention scheduler
#[derive(Debug, Error)]
pub enum RetentionError {
    /// Cron expression could not be parsed
    #[error("invalid backup schedule '{expr}': {detail}")]
    InvalidSchedule { expr: String, detail: String },

    /// No further occurrence exists for the schedule
    #[error("schedule '{0}' has no upcoming occurrence")]
    NoUpcomingRun(String),

    /// Scheduled backup failed after all retry attempts
    #[error("scheduled backup failed after {attempts} attempt(s): {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },

    /// Backup manager failure outside the create/retry loop
    #[error(transparent)]
    Backup(#[from] BackupError),
}
