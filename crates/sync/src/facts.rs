//! Host facts publication
//!
//! Facts are replaced wholesale: the current remote facts are listed, the
//! new set is created, then the old entries are deleted. Nothing is sent
//! while the local set is unchanged since the last successful publication.

use std::collections::BTreeMap;

use tether_registry::FactPayload;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{SyncContext, check_cancelled};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct FactsSync {
    published: Option<BTreeMap<String, String>>,
}

impl FactsSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the facts if they changed; returns whether a publication happened
    pub async fn sync(
        &mut self,
        ctx: &SyncContext,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let facts = ctx.discovery.facts();
        if facts.is_empty() || self.published.as_ref() == Some(&facts) {
            return Ok(false);
        }

        let old = ctx.registry.list_facts(agent_id).await?;

        for (key, value) in &facts {
            check_cancelled(cancel)?;
            let payload = FactPayload {
                agent: agent_id.to_string(),
                key: key.clone(),
                value: value.clone(),
            };
            let id = ctx.registry.create_fact(&payload).await?;
            debug!(fact = %key, id = %id, "fact sent");
        }

        for fact in old {
            check_cancelled(cancel)?;
            match ctx.registry.delete_fact(&fact.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    debug!(fact = %fact.key, error = %e, "old fact deletion failed");
                }
            }
        }

        self.published = Some(facts);
        Ok(true)
    }
}
