//! Metric registration resolver
//!
//! Registers unresolved metrics once everything they depend on (status-of
//! parent, owning service, owning container) has a remote identifier, and
//! purges entries whose dependencies are gone for good. Also refreshes the
//! thresholds of registered metrics and notices metrics deleted upstream.

use std::collections::HashSet;
use std::time::Duration;

use tether_core::{
    AGENT_STATUS, DeletedEntity, MetricIdentity, MetricInfo, MetricRegistration, ThresholdMap,
};
use tether_registry::MetricPayload;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{SyncContext, check_cancelled};
use crate::error::Result;

/// What one resolution cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub registered: usize,
    /// Still waiting on a dependency
    pub blocked: usize,
    pub purged: usize,
    /// Permanently rejected by the registry
    pub rejected: usize,
    pub failed: usize,
}

/// Outcome of checking the dependencies of one metric
#[derive(Debug)]
enum Readiness {
    Ready(MetricPayload),
    Blocked(&'static str),
    Purge(&'static str),
}

/// The agent's own status metric is forgotten instead of tombstoned, so its
/// next emission registers it again
fn is_agent_status(identity: &MetricIdentity) -> bool {
    identity.label == AGENT_STATUS && identity.service.is_none() && identity.item.is_none()
}

/// Resolves metric registrations
#[derive(Debug)]
pub struct Resolver {
    pending_ttl: Duration,
}

impl Resolver {
    pub fn new(pending_ttl: Duration) -> Self {
        Self { pending_ttl }
    }

    fn readiness(
        &self,
        ctx: &SyncContext,
        agent_id: &str,
        identity: &MetricIdentity,
        info: &MetricInfo,
    ) -> Readiness {
        let mut payload = MetricPayload {
            agent: agent_id.to_string(),
            label: identity.label.clone(),
            item: identity.item.clone(),
            ..Default::default()
        };

        if let Some(parent) = info.parent(identity) {
            match ctx.cache.get(&parent) {
                None | Some(MetricRegistration::Deleted) => {
                    return Readiness::Purge("status-of parent is gone");
                }
                Some(MetricRegistration::Unresolved) => {
                    return Readiness::Blocked("status-of parent not registered");
                }
                Some(MetricRegistration::Resolved(id)) => payload.status_of = Some(id),
            }
        }

        if let Some(container) = &info.container {
            if !ctx.discovery.containers().contains_key(container) {
                return Readiness::Purge("container no longer exists");
            }
            match ctx.cache.container(container) {
                Some(registration) => payload.container = Some(registration.id),
                None => return Readiness::Blocked("container not registered"),
            }
        }

        if let Some(service) = info.service(identity) {
            match ctx.cache.service(&service) {
                Some(registration) => payload.service = Some(registration.id),
                None => return Readiness::Blocked("service not registered"),
            }
        }

        Readiness::Ready(payload)
    }

    /// Try to register every unresolved metric
    ///
    /// Status metrics are handled after plain ones so a parent registered in
    /// this cycle unblocks its children right away. A transient registry
    /// failure ends the cycle early.
    pub async fn resolve_pending(
        &self,
        ctx: &SyncContext,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolveReport> {
        let mut report = ResolveReport::default();

        let mut pending = ctx.cache.pending_metrics();
        pending.sort_by_key(|(_, info)| info.as_ref().is_some_and(|i| i.status_of.is_some()));

        for (identity, info) in pending {
            let Some(info) = info else {
                // Known from a previous run only; re-emission re-creates it
                ctx.cache.purge_stale(std::slice::from_ref(&identity))?;
                debug!(metric = %identity, "purged metric not seen since start");
                report.purged += 1;
                continue;
            };

            let payload = match self.readiness(ctx, agent_id, &identity, &info) {
                Readiness::Ready(payload) => payload,
                Readiness::Purge(reason) => {
                    ctx.cache.purge_stale(std::slice::from_ref(&identity))?;
                    debug!(metric = %identity, reason, "purged unresolvable metric");
                    report.purged += 1;
                    continue;
                }
                Readiness::Blocked(reason) => {
                    if info.first_seen().elapsed() >= self.pending_ttl {
                        ctx.cache.purge_stale(std::slice::from_ref(&identity))?;
                        info!(metric = %identity, reason, "dropped metric blocked for too long");
                        report.purged += 1;
                    } else {
                        debug!(metric = %identity, reason, "metric registration deferred");
                        report.blocked += 1;
                    }
                    continue;
                }
            };

            check_cancelled(cancel)?;
            match ctx.registry.register_metric(&payload).await {
                Ok(metric) => {
                    ctx.cache.mark_resolved(&identity, metric.id.clone())?;
                    ctx.cache
                        .set_threshold(metric.threshold_key(), metric.threshold())?;
                    debug!(metric = %identity, id = %metric.id, "metric registered");
                    report.registered += 1;
                }
                Err(e) if e.is_rejected() => {
                    if is_agent_status(&identity) {
                        ctx.cache.purge_stale(std::slice::from_ref(&identity))?;
                    } else {
                        ctx.cache.mark_deleted(&identity)?;
                    }
                    warn!(metric = %identity, error = %e, "metric rejected by the registry");
                    report.rejected += 1;
                }
                Err(e) => {
                    debug!(metric = %identity, error = %e, "metric registration failed");
                    report.failed += 1;
                    if e.is_transient() {
                        break;
                    }
                }
            }
        }

        if report.registered > 0 {
            ctx.observer.on_thresholds_updated(&ctx.cache.thresholds());
        }
        Ok(report)
    }

    /// Reload thresholds and detect metrics deleted on the registry
    ///
    /// Registered metrics that alerting mode no longer allows are deleted
    /// remotely and forgotten locally; a failed deletion is retried on the
    /// next full pass. Cached metrics whose identifier is no longer listed
    /// become tombstones. Returns the tombstoned identities.
    pub async fn refresh_thresholds(
        &self,
        ctx: &SyncContext,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricIdentity>> {
        let remote = ctx.registry.list_metrics(agent_id).await?;

        let mut registered = HashSet::new();
        let mut filtered = HashSet::new();
        let mut thresholds = ThresholdMap::new();
        for metric in remote {
            if !ctx.filter.should_send(&metric.label, metric.has_status()) {
                check_cancelled(cancel)?;
                match ctx.registry.delete_metric(&metric.id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        debug!(id = %metric.id, error = %e, "metric deletion failed");
                        registered.insert(metric.id.clone());
                        continue;
                    }
                }
                debug!(label = %metric.label, id = %metric.id, "deleted metric filtered by alerting mode");
                filtered.insert(metric.id.clone());
                continue;
            }

            registered.insert(metric.id.clone());
            let threshold = metric.threshold();
            if !threshold.is_empty() {
                thresholds.insert(metric.threshold_key(), threshold);
            }
        }

        ctx.cache.replace_thresholds(thresholds.clone())?;
        ctx.observer.on_thresholds_updated(&thresholds);

        let mut forgotten = Vec::new();
        let mut deleted = Vec::new();
        for (identity, id) in ctx.cache.resolved_metrics() {
            if registered.contains(&id) {
                continue;
            }
            if filtered.contains(&id) || is_agent_status(&identity) {
                forgotten.push(identity);
            } else if ctx.cache.mark_deleted(&identity)? {
                deleted.push(identity);
            }
        }

        if !forgotten.is_empty() {
            ctx.cache.purge_stale(&forgotten)?;
            debug!(count = forgotten.len(), "forgot metrics removed from the registry");
        }
        if !deleted.is_empty() {
            info!(count = deleted.len(), "metrics deleted on the registry");
            let entities: Vec<_> = deleted.iter().cloned().map(DeletedEntity::Metric).collect();
            ctx.notify_deleted(&entities);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod resolver_test;
