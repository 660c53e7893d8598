//! Producer entry point
//!
//! Metric producers call [`MetricEmitter::emit`] from any thread. It records
//! the metric's dependency metadata in the identity cache (so the resolver
//! can register it) and queues the point without waiting on the network.

use std::sync::Arc;

use tether_core::{
    IdentityCache, MetricFilter, MetricInfo, MetricPoint, MetricRegistration, SyncSignals,
};
use tracing::warn;

use crate::metrics::TransportMetrics;
use crate::queue::QueueSender;

/// What happened to an emitted point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Queued,
    /// Alerting mode does not send this metric
    Filtered,
    /// The metric was deleted on the platform
    Deleted,
    /// The outbound queue is full
    Dropped,
}

#[derive(Clone)]
pub struct MetricEmitter {
    cache: Arc<IdentityCache>,
    filter: Arc<MetricFilter>,
    signals: Arc<SyncSignals>,
    queue: QueueSender,
    metrics: Arc<TransportMetrics>,
}

impl MetricEmitter {
    pub fn new(
        cache: Arc<IdentityCache>,
        filter: Arc<MetricFilter>,
        signals: Arc<SyncSignals>,
        queue: QueueSender,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            cache,
            filter,
            signals,
            queue,
            metrics,
        }
    }

    /// Record `info` for the point's metric and queue the point
    pub fn emit(&self, point: MetricPoint, info: MetricInfo) -> EmitOutcome {
        if !self.filter.should_send(&point.measurement, point.has_status()) {
            self.metrics.record_filtered();
            return EmitOutcome::Filtered;
        }

        let identity = point.identity();
        match self.cache.record_info(&identity, info) {
            Ok(MetricRegistration::Deleted) => {
                self.metrics.record_dropped_deleted();
                return EmitOutcome::Deleted;
            }
            Ok(_) => {}
            // The in-memory entry is in place; the next cache write persists it
            Err(e) => warn!(metric = %identity, error = %e, "failed to persist metric"),
        }

        if self.queue.push(point) {
            EmitOutcome::Queued
        } else {
            EmitOutcome::Dropped
        }
    }

    /// Local services or containers changed
    pub fn notify_discovery_changed(&self) {
        self.signals.notify_discovery_changed();
    }
}
