//! Checksum error types

use std::path::Path;

use thiserror::Error;

/// Result type for checksum operations
pub type ChecksumResult<T> = Result<T, ChecksumError>;

/// Errors raised while computing or verifying digests
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// Artifact could not be read
    #[error("cannot read '{path}' for checksum: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Stored digest string is not in canonical `sha256:<hex>` form
    #[error("stored checksum '{0}' is malformed; expected sha256:<64 hex chars>")]
    Malformed(String),
}

impl ChecksumError {
    pub(crate) fn io_at(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn malformed(digest: &str) -> Self {
        Self::Malformed(digest.to_string())
    }
}
