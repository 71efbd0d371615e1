//! Backup error types
//!
//! Every message names the backup and the remedy; resource exhaustion and
//! engine unavailability stay distinguishable so callers can pick the right
//! retry policy.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::audit::AuditError;
use crate::checksum::ChecksumError;
use crate::engine::EngineError;

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Errors raised by the backup manager
#[derive(Debug, Error)]
pub enum BackupError {
    /// Another backup creation holds the creation lock
    #[error("a backup is already being created; wait for it to finish before starting another")]
    CreationInProgress,

    /// Caller-supplied id collides with an existing record
    #[error("backup id '{0}' already exists; ids are immutable, choose a different id")]
    DuplicateId(String),

    /// No record with this id
    #[error("no backup with id '{0}'; run 'graphvault list' to see known backups")]
    UnknownBackup(String),

    /// Validation requested for a record that never completed
    #[error("backup '{id}' is {status} and has no checksum to validate; only completed backups can be validated")]
    NotValidatable { id: String, status: &'static str },

    /// Status lifecycle violation
    #[error("backup '{id}' status cannot move {from} -> {to}; status only advances")]
    StatusRegression {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    /// Storage device is full; the backup was aborted cleanly
    #[error("backup storage at '{path}' is full; free space or tighten the retention policy, the next scheduled attempt will still run")]
    StorageExhausted { path: String },

    /// Backup is the target of an in-flight recovery
    #[error("backup '{0}' is the target of an in-flight recovery and cannot be deleted until the recovery completes or is reset")]
    PinnedByRecovery(String),

    /// Metadata file exists but does not parse
    #[error("metadata for backup '{id}' is unreadable: {detail}")]
    Metadata { id: String, detail: String },

    /// Underlying I/O failure with context
    #[error("backup I/O failure while {context} at '{path}': {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    /// Graph engine failure during export
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Digest computation failure
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// Audit entry could not be written in the same logical transaction
    #[error("backup succeeded but its audit entry could not be written: {0}")]
    Audit(#[from] AuditError),
}

impl BackupError {
    /// Wraps an I/O error, promoting a full disk to StorageExhausted.
    pub(crate) fn io(context: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::StorageFull {
            return Self::StorageExhausted {
                path: path.display().to_string(),
            };
        }
        Self::Io {
            context,
            path: path.display().to_string(),
            source,
        }
    }

    /// True if the failure is worth retrying with backoff (engine away or
    /// plain I/O flake), as opposed to a state or integrity problem.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackupError::Engine(EngineError::Unavailable(_))
                | BackupError::Engine(EngineError::Timeout(_))
                | BackupError::Engine(EngineError::ExportFailed { .. })
                | BackupError::Io { .. }
        )
    }
}
