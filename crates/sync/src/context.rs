//! Handles shared by every synchronization step

use std::sync::Arc;

use tether_core::{
    DeletedEntity, Discovery, IdentityCache, MetricFilter, SyncObserver, SyncSignals,
};
use tether_registry::Registry;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};

/// Everything a synchronization step reads or writes
#[derive(Clone)]
pub struct SyncContext {
    pub cache: Arc<IdentityCache>,
    pub registry: Arc<dyn Registry>,
    pub discovery: Arc<dyn Discovery>,
    pub observer: Arc<dyn SyncObserver>,
    pub signals: Arc<SyncSignals>,
    pub filter: Arc<MetricFilter>,
    /// Account the agent belongs to, sent with service payloads
    pub account_id: String,
}

impl SyncContext {
    pub fn agent_id(&self) -> Result<String> {
        self.cache.agent_id().ok_or(SyncError::NotRegistered)
    }

    pub(crate) fn notify_deleted(&self, entities: &[DeletedEntity]) {
        if !entities.is_empty() {
            self.observer.on_entity_deleted(entities);
        }
    }
}

/// Fail fast between remote calls once shutdown started
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}
