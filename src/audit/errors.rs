//! Audit log error types

use thiserror::Error;

/// Result type for audit operations
pub type AuditResult<T> = Result<T, AuditError>;

/// Errors raised by audit log backends
#[derive(Debug, Error)]
pub enum AuditError {
    /// Backing file could not be written or read
    #[error("audit log I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be serialized, or a stored line is not valid JSON
    #[error("audit entry serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    /// In-process lock around the log was poisoned
    #[error("audit log lock poisoned; a writer panicked mid-append")]
    LockPoisoned,
}
