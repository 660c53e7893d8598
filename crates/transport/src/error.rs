//! Transport error types

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The MQTT client's request channel is closed
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to read CA file {path}: {source}")]
    CaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Control message at or above the size limit
    #[error("control payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid control payload: {0}")]
    InvalidControl(String),
}
