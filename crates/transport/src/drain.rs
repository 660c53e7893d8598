//! Drain loop: outbound queue to transport
//!
//! Each cycle:
//!
//! 1. re-inspects the pending set (points whose metric was not registered
//!    yet), moving newly resolved points into the batch
//! 2. waits up to `first_wait` for a queued point, then keeps reading with
//!    an `idle_timeout` until `batch_size` points were read
//! 3. publishes the batch on the data topic
//!
//! A point is only ever sent with the remote identifier of its metric, so
//! nothing reaches the platform before the metric is registered. Points of
//! deleted metrics are dropped. When a cycle sent nothing and the pending set
//! did not shrink, the loop pauses for `stall_pause`.

use std::collections::VecDeque;
use std::sync::Arc;

use tether_config::QueueConfig;
use tether_core::{IdentityCache, MetricPoint, MetricRegistration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::TransportMetrics;
use crate::queue::QueueReceiver;
use crate::transport::TransportHandle;
use crate::wire::{self, ResolvedPoint};

/// What one drain cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Points read from the queue
    pub drained: usize,
    /// Points handed to the transport
    pub sent: usize,
    pub pending_before: usize,
    pub pending_after: usize,
    /// Every producer is gone and the queue is empty
    pub closed: bool,
}

impl CycleReport {
    /// Nothing sent and the pending set did not shrink
    pub fn stalled(&self) -> bool {
        self.sent == 0 && self.pending_after > 0 && self.pending_after >= self.pending_before
    }
}

pub struct DrainLoop {
    rx: QueueReceiver,
    cache: Arc<IdentityCache>,
    transport: TransportHandle,
    config: QueueConfig,
    pending: VecDeque<MetricPoint>,
    metrics: Arc<TransportMetrics>,
}

impl DrainLoop {
    pub fn new(
        rx: QueueReceiver,
        cache: Arc<IdentityCache>,
        transport: TransportHandle,
        config: &QueueConfig,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            rx,
            cache,
            transport,
            config: config.clone(),
            pending: VecDeque::new(),
            metrics,
        }
    }

    /// Points waiting for their metric to be registered
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn hold(&mut self, point: MetricPoint) {
        if self.pending.len() >= self.config.capacity.max(1) {
            self.pending.pop_front();
            self.metrics.record_evicted();
        }
        self.pending.push_back(point);
    }

    /// Route a point to the batch, the pending set or nowhere
    fn classify(&mut self, point: MetricPoint, batch: &mut Vec<ResolvedPoint>) {
        match self.cache.lookup(&point.identity()) {
            MetricRegistration::Resolved(uuid) => batch.push(ResolvedPoint { point, uuid }),
            MetricRegistration::Deleted => self.metrics.record_dropped_deleted(),
            MetricRegistration::Unresolved => self.hold(point),
        }
    }

    fn recheck_pending(&mut self, batch: &mut Vec<ResolvedPoint>) {
        for point in std::mem::take(&mut self.pending) {
            self.classify(point, batch);
        }
    }

    /// Read up to `batch_size` points from the queue
    ///
    /// Returns the number read and whether the queue is closed.
    async fn fill(
        &mut self,
        batch: &mut Vec<ResolvedPoint>,
        cancel: &CancellationToken,
    ) -> (usize, bool) {
        let first = tokio::select! {
            _ = cancel.cancelled() => return (0, false),
            first = tokio::time::timeout(self.config.first_wait, self.rx.recv()) => first,
        };
        let point = match first {
            Ok(Some(point)) => point,
            Ok(None) => return (0, true),
            Err(_) => return (0, false),
        };
        self.classify(point, batch);

        let mut drained = 1;
        while drained < self.config.batch_size {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = tokio::time::timeout(self.config.idle_timeout, self.rx.recv()) => next,
            };
            match next {
                Ok(Some(point)) => {
                    self.classify(point, batch);
                    drained += 1;
                }
                Ok(None) => return (drained, true),
                Err(_) => break,
            }
        }
        (drained, false)
    }

    /// Publish a batch, split at the batch ceiling; returns the points sent
    async fn send(&self, batch: &[ResolvedPoint]) -> usize {
        let mut sent = 0;
        for chunk in batch.chunks(self.config.batch_size.max(1)) {
            let payload = match wire::encode_batch(chunk) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, points = chunk.len(), "failed to encode batch");
                    continue;
                }
            };
            match self.transport.publish_data(payload, chunk.len()).await {
                Ok(true) => sent += chunk.len(),
                Ok(false) => debug!(points = chunk.len(), "batch dropped by transport"),
                Err(e) => warn!(error = %e, points = chunk.len(), "failed to publish batch"),
            }
        }
        sent
    }

    /// One drain cycle
    pub async fn cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport {
            pending_before: self.pending.len(),
            ..Default::default()
        };
        let mut batch = Vec::new();

        self.recheck_pending(&mut batch);
        let (drained, closed) = self.fill(&mut batch, cancel).await;
        report.drained = drained;
        report.closed = closed;

        if !batch.is_empty() {
            report.sent = self.send(&batch).await;
        }

        report.pending_after = self.pending.len();
        self.metrics.set_pending(report.pending_after);
        report
    }

    async fn pause(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.stall_pause) => {}
        }
    }

    /// Drain until `cancel` fires, then flush what is left
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(
            batch_size = self.config.batch_size,
            capacity = self.config.capacity,
            "drain loop started"
        );

        while !cancel.is_cancelled() {
            // Points stay queued while offline; the queue bounds them
            if !self.transport.is_connected() {
                self.pause(&cancel).await;
                continue;
            }

            let report = self.cycle(&cancel).await;
            if report.closed {
                break;
            }
            if report.stalled() {
                self.pause(&cancel).await;
            }
        }

        self.flush().await;
    }

    /// Send what is still queued, within `shutdown_grace`
    async fn flush(&mut self) {
        let deadline = Instant::now() + self.config.shutdown_grace;
        let mut batch = Vec::new();
        self.recheck_pending(&mut batch);
        while let Some(point) = self.rx.try_recv() {
            self.classify(point, &mut batch);
        }

        let mut sent = 0;
        if !batch.is_empty() && self.transport.is_connected() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.send(&batch)).await {
                Ok(count) => sent = count,
                Err(_) => warn!("flush did not finish within the shutdown grace period"),
            }
        }

        info!(
            sent,
            unsent = batch.len() - sent.min(batch.len()),
            unregistered = self.pending.len(),
            "drain loop stopped"
        );
    }
}

#[cfg(test)]
#[path = "drain_test.rs"]
mod drain_test;
