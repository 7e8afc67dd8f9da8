//! Error types for configuration resolution.

use std::path::PathBuf;

/// Errors produced while loading or resolving a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("config {} must be a mapping at the top level, found {found}", path.display())]
    NotAMapping { path: PathBuf, found: String },

    #[error("cannot resolve interpolation ${{{expr}}}: {reason}")]
    Interpolation { expr: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialize(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
