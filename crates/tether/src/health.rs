//! Periodic health report
//!
//! Every `health_interval` the reporter logs what keeps the agent from
//! delivering metrics and emits the `agent_status` point. That point is also
//! what gets `agent_status` registered, which the transport waits for.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tether_core::{AGENT_STATUS, IdentityCache, MetricIdentity, MetricInfo, MetricPoint};
use tether_transport::{EmitOutcome, MetricEmitter, TransportHandle, TransportMetrics};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One health observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub registered: bool,
    pub connected: bool,
    /// Unacknowledged publishes reached the ceiling
    pub saturated: bool,
    /// Points waiting for their metric to be registered
    pub points_pending: u64,
    /// Metrics not registered yet
    pub metrics_unresolved: usize,
    pub points_sent: u64,
    pub points_lost: u64,
}

impl Health {
    /// Human-readable problems, empty when healthy
    pub fn problems(&self) -> Vec<&'static str> {
        let mut problems = Vec::new();
        if !self.registered {
            problems.push("agent is not registered");
        }
        if !self.connected {
            problems.push("not connected to the broker");
        }
        if self.saturated {
            problems.push("too many unacknowledged messages");
        }
        if self.points_pending > 0 {
            problems.push("points blocked on unregistered metrics");
        }
        problems
    }
}

pub struct HealthReporter {
    cache: Arc<IdentityCache>,
    emitter: MetricEmitter,
    metrics: Arc<TransportMetrics>,
    /// Set once the broker session is started
    transport: Arc<OnceLock<TransportHandle>>,
    interval: Duration,
}

impl HealthReporter {
    pub fn new(
        cache: Arc<IdentityCache>,
        emitter: MetricEmitter,
        metrics: Arc<TransportMetrics>,
        transport: Arc<OnceLock<TransportHandle>>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            emitter,
            metrics,
            transport,
            interval,
        }
    }

    pub fn check(&self) -> Health {
        let snapshot = self.metrics.snapshot();
        let transport = self.transport.get();
        Health {
            registered: self.cache.agent_id().is_some(),
            connected: transport.is_some_and(TransportHandle::is_connected),
            saturated: transport.is_some_and(|t| t.in_flight().is_saturated()),
            points_pending: snapshot.points_pending,
            metrics_unresolved: self.cache.stats().unresolved,
            points_sent: snapshot.points_sent,
            points_lost: snapshot.points_lost(),
        }
    }

    /// Log the current health and emit `agent_status`
    pub fn report(&self) -> Health {
        let health = self.check();
        let problems = health.problems();
        if problems.is_empty() {
            info!(
                points_sent = health.points_sent,
                points_lost = health.points_lost,
                "agent healthy"
            );
        } else {
            warn!(
                problems = ?problems,
                points_pending = health.points_pending,
                metrics_unresolved = health.metrics_unresolved,
                points_lost = health.points_lost,
                "agent degraded"
            );
        }

        let point = MetricPoint::new(&MetricIdentity::new(AGENT_STATUS), 0.0).with_status("ok");
        match self.emitter.emit(point, MetricInfo::new()) {
            EmitOutcome::Queued => {}
            outcome => debug!(outcome = ?outcome, "agent_status not queued"),
        }
        health
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }
}
