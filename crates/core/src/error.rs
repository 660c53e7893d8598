//! Core error types

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the identity cache and its state file
#[derive(Debug, Error)]
pub enum CoreError {
    /// Reading or writing the state file failed
    #[error("state file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// State file content is not valid
    #[error("invalid state file '{path}': {source}")]
    Corrupted {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot could not be serialized
    #[error("failed to serialize state: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
