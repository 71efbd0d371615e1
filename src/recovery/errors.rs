//! Recovery error types
//!
//! Invalid state transitions are rejected synchronously with no side
//! effects; integrity faults block promotion and are never auto-repaired.

use thiserror::Error;

use crate::backup::BackupError;
use crate::engine::EngineError;

/// Result type for recovery operations
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Errors raised by the recovery state machine
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A recovery is already running; at most one may be in flight
    #[error("a recovery is already in progress{}; wait for it to finish or reset it", .active.as_deref().map(|id| format!(" (restoring backup '{}')", id)).unwrap_or_default())]
    AlreadyInProgress { active: Option<String> },

    /// Operation not legal in the current state
    #[error("cannot {operation} while recovery state is {current}; {remedy}")]
    InvalidState {
        operation: &'static str,
        current: &'static str,
        remedy: &'static str,
    },

    /// Progress may only move forward
    #[error("recovery progress cannot move backwards from {from}% to {to}%")]
    ProgressRegression { from: u8, to: u8 },

    /// Chosen backup failed checksum validation before any target was touched
    #[error("backup '{0}' failed checksum validation; its artifact is corrupt, choose a different backup")]
    BackupCorrupt(String),

    /// Restored graph does not match the backup's recorded statistics
    #[error("restored target '{target}' has {actual_nodes} nodes / {actual_rels} relationships but backup '{backup_id}' recorded {expected_nodes} / {expected_rels}; promotion is blocked")]
    RestoreMismatch {
        backup_id: String,
        target: String,
        expected_nodes: u64,
        expected_rels: u64,
        actual_nodes: u64,
        actual_rels: u64,
    },

    /// Another promotion is mid-cutover
    #[error("another promotion is already in flight; only one cutover may run at a time")]
    PromotionInFlight,

    /// Restore was cancelled by the operator
    #[error("recovery of backup '{0}' was cancelled by the operator")]
    Cancelled(String),

    /// State mutex was poisoned by a panicking holder
    #[error("recovery state lock poisoned; restart the process before attempting another recovery")]
    LockPoisoned,

    /// Backup manager failure during validation or artifact access
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Engine failure during restore or cutover
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Scratch-file I/O failure while staging the restore
    #[error("restore staging I/O failure: {0}")]
    Io(#[from] std::io::Error),
}
