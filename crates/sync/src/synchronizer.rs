//! The synchronizer loop
//!
//! A single task owns every registry write. Each tick:
//!
//! 1. registers the agent if needed
//! 2. runs a full pass when due (agent record, remote deletions, thresholds);
//!    a failed full pass does not stop the steps below
//! 3. registers containers when discovery changed or on a full pass
//! 4. registers services
//! 5. resolves pending metrics
//! 6. publishes facts
//!
//! Ticks run every `sync.interval` and immediately when discovery changes or
//! the platform requests a resync.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tether_config::SyncConfig;
use tether_core::{AGENT_STATUS, MetricIdentity, PendingSignals};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bootstrap::Bootstrap;
use crate::context::{SyncContext, check_cancelled};
use crate::error::{Result, SyncError};
use crate::facts::FactsSync;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::resolver::{ResolveReport, Resolver};

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The agent has an identifier
    pub registered: bool,
    pub full_pass: bool,
    /// A full pass was due but did not complete; the next tick retries it
    pub full_pass_failed: bool,
    pub services: ReconcileReport,
    pub containers: ReconcileReport,
    pub metrics: ResolveReport,
    /// Metrics found deleted on the registry
    pub metrics_deleted: usize,
    pub facts_sent: bool,
}

pub struct Synchronizer {
    ctx: SyncContext,
    bootstrap: Bootstrap,
    reconciler: Reconciler,
    resolver: Resolver,
    facts: FactsSync,
    interval: Duration,
    full_interval: Duration,
    last_full: Option<Instant>,
    /// A full pass was requested but has not completed yet
    full_pending: bool,
    /// Some container failed to sync and must be retried
    containers_dirty: bool,
    ready: watch::Sender<bool>,
}

impl Synchronizer {
    pub fn new(ctx: SyncContext, bootstrap: Bootstrap, config: &SyncConfig) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            ctx,
            bootstrap,
            reconciler: Reconciler::new(config.container_grace),
            resolver: Resolver::new(config.pending_ttl),
            facts: FactsSync::new(),
            interval: config.interval,
            full_interval: config.full_interval,
            last_full: None,
            full_pending: false,
            containers_dirty: false,
            ready,
        }
    }

    /// True once the agent is registered and its status metric resolved
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    fn full_pass_due(&self, pending: &PendingSignals) -> bool {
        self.full_pending
            || pending.forces_full_pass()
            || self
                .last_full
                .is_none_or(|last| last.elapsed() >= self.full_interval)
    }

    fn update_readiness(&self) {
        let ready = self.ctx.cache.agent_id().is_some()
            && self
                .ctx
                .cache
                .lookup(&MetricIdentity::new(AGENT_STATUS))
                .is_resolved();
        self.ready.send_if_modified(|current| {
            let changed = *current != ready;
            *current = ready;
            changed
        });
    }

    /// Agent record, remote deletions and thresholds
    async fn full_pass(
        &mut self,
        ctx: &SyncContext,
        agent_id: &str,
        report: &mut TickReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        let agent = ctx.registry.agent(agent_id).await?;
        if ctx.filter.set_alerting_mode(agent.alerting_mode) {
            info!(enabled = agent.alerting_mode, "alerting mode changed");
            ctx.observer.on_alerting_mode(agent.alerting_mode);
        }

        let purged = self
            .reconciler
            .purge_remote_deletions(ctx, agent_id, cancel)
            .await?;
        report.services.forgotten += purged.forgotten;

        check_cancelled(cancel)?;
        report.metrics_deleted = self
            .resolver
            .refresh_thresholds(ctx, agent_id, cancel)
            .await?
            .len();
        Ok(())
    }

    /// Run one synchronization tick
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<TickReport> {
        let pending = self.ctx.signals.take();
        let result = self.tick_inner(&pending, cancel).await;
        self.update_readiness();

        if result.is_err() && pending.forces_full_pass() {
            self.full_pending = true;
        }
        if result.is_err() && pending.discovery_changed {
            self.containers_dirty = true;
        }
        result
    }

    async fn tick_inner(
        &mut self,
        pending: &PendingSignals,
        cancel: &CancellationToken,
    ) -> Result<TickReport> {
        let mut report = TickReport::default();
        let ctx = self.ctx.clone();

        let Some(agent_id) = self.bootstrap.ensure_registered(&ctx).await? else {
            return Ok(report);
        };
        report.registered = true;

        if self.full_pass_due(pending) {
            self.full_pending = true;
            match self.full_pass(&ctx, &agent_id, &mut report, cancel).await {
                Ok(()) => {
                    self.last_full = Some(Instant::now());
                    self.full_pending = false;
                    report.full_pass = true;
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    if e.is_transient() {
                        debug!(error = %e, "full pass failed, will retry");
                    } else {
                        warn!(error = %e, "full pass failed, will retry");
                    }
                    report.full_pass_failed = true;
                }
            }
        }

        if report.full_pass || pending.discovery_changed || self.containers_dirty {
            check_cancelled(cancel)?;
            report.containers = self
                .reconciler
                .sync_containers(&ctx, &agent_id, cancel)
                .await?;
            self.containers_dirty = report.containers.failed > 0;
        }

        check_cancelled(cancel)?;
        report.services = {
            let mut services = self.reconciler.sync_services(&ctx, &agent_id, cancel).await?;
            services.forgotten += report.services.forgotten;
            services
        };

        check_cancelled(cancel)?;
        report.metrics = self
            .resolver
            .resolve_pending(&ctx, &agent_id, cancel)
            .await?;

        check_cancelled(cancel)?;
        report.facts_sent = self.facts.sync(&ctx, &agent_id, cancel).await?;

        Ok(report)
    }

    /// Tick until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let signals = Arc::clone(&self.ctx.signals);

        info!(interval = ?self.interval, "synchronizer started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
                _ = signals.notified() => {}
            }

            match self.tick(&cancel).await {
                Ok(report) => {
                    if report.full_pass
                        || report.full_pass_failed
                        || !report.services.is_empty()
                        || !report.containers.is_empty()
                        || report.metrics.registered > 0
                    {
                        debug!(?report, "synchronization tick");
                    }
                }
                Err(SyncError::Cancelled) => break,
                Err(e) if e.is_transient() => {
                    debug!(error = %e, "synchronization tick failed, will retry");
                }
                Err(e) => {
                    warn!(error = %e, "synchronization tick failed");
                }
            }
        }

        info!("synchronizer stopped");
    }
}

#[cfg(test)]
#[path = "synchronizer_test.rs"]
mod synchronizer_test;
