//! CLI-specific error types
//!
//! Every CLI failure prints one coded line on stderr and exits non-zero.

use std::fmt;
use std::io;

use crate::audit::AuditError;
use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::recovery::RecoveryError;
use crate::retention::RetentionError;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file or environment error
    ConfigError,
    /// I/O error (stdin/stdout)
    IoError,
    /// Caller-supplied argument is unusable
    InvalidArgument,
    /// Backup subsystem failure
    BackupError,
    /// Recovery state machine failure
    RecoveryError,
    /// Retention scheduler failure
    RetentionError,
    /// Audit store failure
    AuditError,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "VAULT_CLI_CONFIG_ERROR",
            Self::IoError => "VAULT_CLI_IO_ERROR",
            Self::InvalidArgument => "VAULT_CLI_INVALID_ARGUMENT",
            Self::BackupError => "VAULT_CLI_BACKUP_ERROR",
            Self::RecoveryError => "VAULT_CLI_RECOVERY_ERROR",
            Self::RetentionError => "VAULT_CLI_RETENTION_ERROR",
            Self::AuditError => "VAULT_CLI_AUDIT_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Invalid argument
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidArgument, msg)
    }

    /// Get the error code
    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::new(CliErrorCode::IoError, e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(CliErrorCode::IoError, format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::new(CliErrorCode::ConfigError, e.to_string())
    }
}

impl From<BackupError> for CliError {
    fn from(e: BackupError) -> Self {
        Self::new(CliErrorCode::BackupError, e.to_string())
    }
}

impl From<RecoveryError> for CliError {
    fn from(e: RecoveryError) -> Self {
        Self::new(CliErrorCode::RecoveryError, e.to_string())
    }
}

impl From<RetentionError> for CliError {
    fn from(e: RetentionError) -> Self {
        Self::new(CliErrorCode::RetentionError, e.to_string())
    }
}

impl From<AuditError> for CliError {
    fn from(e: AuditError) -> Self {
        Self::new(CliErrorCode::AuditError, e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
