//! Engine boundary error types

use std::time::Duration;

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the graph engine boundary
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine did not respond at all
    #[error("graph engine unreachable: {0}")]
    Unavailable(String),

    /// A time-bounded query exceeded its deadline
    #[error("engine query exceeded its {}ms deadline", .0.as_millis())]
    Timeout(Duration),

    /// Named instance does not exist on this engine
    #[error("graph instance '{0}' does not exist")]
    UnknownInstance(String),

    /// Export stream failed mid-flight
    #[error("export from instance '{instance}' failed: {detail}")]
    ExportFailed { instance: String, detail: String },

    /// Import stream failed or was not a valid export
    #[error("import into instance '{instance}' failed: {detail}")]
    ImportFailed { instance: String, detail: String },

    /// Refused to run a destructive operation against the serving instance
    #[error("operation would touch the serving instance '{0}'; restores must target an isolated instance")]
    ServingInstanceProtected(String),

    /// I/O failure while streaming to or from the engine
    #[error("I/O error during engine transfer: {0}")]
    Io(#[from] std::io::Error),
}
