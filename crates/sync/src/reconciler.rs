//! Entity reconciler: services and containers
//!
//! Three independent steps driven by the synchronizer:
//!
//! - [`Reconciler::purge_remote_deletions`] (full pass only): forget cached
//!   entities the registry no longer knows
//! - [`Reconciler::sync_services`] (every tick): create, update and delete
//!   services so the registry matches discovery
//! - [`Reconciler::sync_containers`] (on discovery change or full pass): same
//!   for containers, with deletions debounced
//!
//! One entity failing never stops the others; it is retried on a later tick.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tether_core::{
    ContainerRegistration, DeletedEntity, ServiceIdentity, ServiceRegistration, inspect_hash,
};
use tether_registry::{ContainerPayload, ServicePayload};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::{SyncContext, check_cancelled};
use crate::error::Result;

/// Fact holding the container runtime API version
const DOCKER_API_VERSION_FACT: &str = "docker_api_version";

/// What a reconciliation step did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Cached entities dropped because the registry no longer has them
    pub forgotten: usize,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn merge(&mut self, other: ReconcileReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.forgotten += other.forgotten;
        self.failed += other.failed;
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Absence tracking for a container still in the cache
#[derive(Debug, Clone, Copy)]
struct Absence {
    since: Instant,
    passes: u32,
}

/// Container deletions wait for this many consecutive passes
const ABSENT_PASSES: u32 = 2;

/// Reconciles services and containers with the registry
#[derive(Debug)]
pub struct Reconciler {
    container_grace: Duration,
    absent: HashMap<String, Absence>,
}

impl Reconciler {
    pub fn new(container_grace: Duration) -> Self {
        Self {
            container_grace,
            absent: HashMap::new(),
        }
    }

    /// Drop cached services and containers deleted on the registry side
    pub async fn purge_remote_deletions(
        &mut self,
        ctx: &SyncContext,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let remote: HashSet<String> = ctx
            .registry
            .list_services(agent_id)
            .await?
            .into_iter()
            .map(|entity| entity.id)
            .collect();
        let gone: Vec<ServiceIdentity> = ctx
            .cache
            .services()
            .into_iter()
            .filter(|(_, registration)| !remote.contains(&registration.id))
            .map(|(identity, _)| identity)
            .collect();
        if !gone.is_empty() {
            report.forgotten += ctx.cache.remove_services(&gone)?;
            info!(services = ?gone, "services deleted on the registry");
            let entities: Vec<_> = gone.into_iter().map(DeletedEntity::Service).collect();
            ctx.notify_deleted(&entities);
        }

        check_cancelled(cancel)?;

        let remote: HashSet<String> = ctx
            .registry
            .list_containers(agent_id)
            .await?
            .into_iter()
            .map(|entity| entity.id)
            .collect();
        let gone: Vec<String> = ctx
            .cache
            .containers()
            .into_iter()
            .filter(|(_, registration)| !remote.contains(&registration.id))
            .map(|(name, _)| name)
            .collect();
        if !gone.is_empty() {
            report.forgotten += ctx.cache.remove_containers(&gone)?;
            for name in &gone {
                self.absent.remove(name);
            }
            info!(containers = ?gone, "containers deleted on the registry");
            let entities: Vec<_> = gone.into_iter().map(DeletedEntity::Container).collect();
            ctx.notify_deleted(&entities);
        }

        Ok(report)
    }

    /// Register new or changed services, delete the ones no longer discovered
    pub async fn sync_services(
        &mut self,
        ctx: &SyncContext,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let discovered = ctx.discovery.services();

        for (identity, descriptor) in &discovered {
            check_cancelled(cancel)?;

            let cached = ctx.cache.service(identity);
            if let Some(cached) = &cached
                && cached.descriptor == *descriptor
            {
                continue;
            }

            let payload = ServicePayload {
                descriptor: descriptor.clone(),
                account: ctx.account_id.clone(),
                agent: agent_id.to_string(),
            };
            let outcome = match &cached {
                Some(cached) => ctx.registry.update_service(&cached.id, &payload).await,
                None => ctx.registry.create_service(&payload).await,
            };

            match outcome {
                Ok(id) => {
                    debug!(service = %identity, id = %id, "service registered");
                    ctx.cache.set_service(
                        identity.clone(),
                        ServiceRegistration {
                            descriptor: descriptor.clone(),
                            id,
                        },
                    )?;
                    if cached.is_some() {
                        report.updated += 1;
                    } else {
                        report.created += 1;
                    }
                }
                Err(e) => {
                    debug!(service = %identity, error = %e, "service registration failed");
                    report.failed += 1;
                }
            }
        }

        for (identity, registration) in ctx.cache.services() {
            if discovered.contains_key(&identity) {
                continue;
            }
            check_cancelled(cancel)?;

            match ctx.registry.delete_service(&registration.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    debug!(service = %identity, error = %e, "service deletion failed");
                    report.failed += 1;
                    continue;
                }
            }
            ctx.cache.remove_services(std::slice::from_ref(&identity))?;
            debug!(service = %identity, "service deleted");
            report.deleted += 1;
        }

        if report.deleted > 0 {
            ctx.signals.note_deletion();
        }
        Ok(report)
    }

    /// Register new or changed containers, delete long-gone ones
    pub async fn sync_containers(
        &mut self,
        ctx: &SyncContext,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let discovered = ctx.discovery.containers();
        let api_version = ctx
            .discovery
            .facts()
            .get(DOCKER_API_VERSION_FACT)
            .cloned()
            .unwrap_or_default();

        for (name, inspect) in &discovered {
            self.absent.remove(name);
            check_cancelled(cancel)?;

            let hash = inspect_hash(inspect);
            let cached = ctx.cache.container(name);
            if let Some(cached) = &cached
                && cached.inspect_hash == hash
            {
                continue;
            }

            let payload = ContainerPayload::from_inspect(agent_id, name, inspect, &api_version);
            let outcome = match &cached {
                Some(cached) => ctx.registry.update_container(&cached.id, &payload).await,
                None => ctx.registry.create_container(&payload).await,
            };

            match outcome {
                Ok(id) => {
                    debug!(container = %name, id = %id, "container registered");
                    ctx.cache.set_container(
                        name.clone(),
                        ContainerRegistration {
                            inspect_hash: hash,
                            id,
                        },
                    )?;
                    if cached.is_some() {
                        report.updated += 1;
                    } else {
                        report.created += 1;
                    }
                }
                Err(e) => {
                    debug!(container = %name, error = %e, "container registration failed");
                    report.failed += 1;
                }
            }
        }

        let now = Instant::now();
        for (name, registration) in ctx.cache.containers() {
            if discovered.contains_key(&name) {
                continue;
            }

            let absence = self.absent.entry(name.clone()).or_insert(Absence {
                since: now,
                passes: 0,
            });
            absence.passes += 1;
            if absence.passes < ABSENT_PASSES || now.duration_since(absence.since) < self.container_grace {
                debug!(container = %name, passes = absence.passes, "container absent, deletion deferred");
                continue;
            }

            check_cancelled(cancel)?;
            match ctx.registry.delete_container(&registration.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    debug!(container = %name, error = %e, "container deletion failed");
                    report.failed += 1;
                    continue;
                }
            }
            ctx.cache.remove_containers(std::slice::from_ref(&name))?;
            self.absent.remove(&name);
            debug!(container = %name, "container deleted");
            report.deleted += 1;
        }

        if report.deleted > 0 {
            ctx.signals.note_deletion();
        }
        Ok(report)
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
