//! Synchronizer error types

use tether_core::CoreError;
use tether_registry::RegistryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Registry call failed; retried on a later tick
    #[error("registry call failed: {0}")]
    Registry(#[from] RegistryError),

    /// Identity cache could not be persisted
    #[error("identity cache error: {0}")]
    Cache(#[from] CoreError),

    /// The agent has no identifier yet
    #[error("agent is not registered")]
    NotRegistered,

    /// Shutdown requested while the pass was running
    #[error("synchronization cancelled")]
    Cancelled,
}

impl SyncError {
    /// Network-level or server-side failure worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Registry(e) if e.is_transient())
    }
}
