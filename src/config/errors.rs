//! Configuration error types

use std::io;

use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Config file is not valid JSON for the expected shape
    #[error("config file '{path}' does not parse: {detail}")]
    Parse { path: String, detail: String },

    /// Environment variable carries an unusable value
    #[error("environment variable {var} has invalid value '{value}', expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}
