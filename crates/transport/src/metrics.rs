//! Transport counters
//!
//! Updated lock-free from the emitter, the drain loop and the MQTT event
//! pump; read through [`TransportMetrics::snapshot`] by the health reporter.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportMetrics {
    points_queued: AtomicU64,
    points_dropped_full: AtomicU64,
    points_filtered: AtomicU64,
    points_dropped_deleted: AtomicU64,
    points_evicted: AtomicU64,
    points_sent: AtomicU64,
    points_pending: AtomicU64,
    batches_sent: AtomicU64,
    messages_dropped_in_flight: AtomicU64,
    messages_dropped_offline: AtomicU64,
    publish_errors: AtomicU64,
    connections: AtomicU64,
    disconnections: AtomicU64,
    control_messages: AtomicU64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_queued(&self) {
        self.points_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Point dropped because the queue was full
    #[inline]
    pub fn record_dropped_full(&self) {
        self.points_dropped_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Point not sent because alerting mode filters it out
    #[inline]
    pub fn record_filtered(&self) {
        self.points_filtered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_deleted(&self) {
        self.points_dropped_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Oldest pending point dropped to make room
    #[inline]
    pub fn record_evicted(&self) {
        self.points_evicted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_pending(&self, count: usize) {
        self.points_pending.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_sent(&self, points: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.points_sent.fetch_add(points as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_in_flight(&self) {
        self.messages_dropped_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_offline(&self) {
        self.messages_dropped_offline.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connected(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_disconnected(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_control_message(&self) {
        self.control_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            points_queued: self.points_queued.load(Ordering::Relaxed),
            points_dropped_full: self.points_dropped_full.load(Ordering::Relaxed),
            points_filtered: self.points_filtered.load(Ordering::Relaxed),
            points_dropped_deleted: self.points_dropped_deleted.load(Ordering::Relaxed),
            points_evicted: self.points_evicted.load(Ordering::Relaxed),
            points_sent: self.points_sent.load(Ordering::Relaxed),
            points_pending: self.points_pending.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            messages_dropped_in_flight: self.messages_dropped_in_flight.load(Ordering::Relaxed),
            messages_dropped_offline: self.messages_dropped_offline.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            disconnections: self.disconnections.load(Ordering::Relaxed),
            control_messages: self.control_messages.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransportMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportSnapshot {
    pub points_queued: u64,
    pub points_dropped_full: u64,
    pub points_filtered: u64,
    pub points_dropped_deleted: u64,
    pub points_evicted: u64,
    pub points_sent: u64,
    /// Points currently waiting for their metric to be registered
    pub points_pending: u64,
    pub batches_sent: u64,
    pub messages_dropped_in_flight: u64,
    pub messages_dropped_offline: u64,
    pub publish_errors: u64,
    pub connections: u64,
    pub disconnections: u64,
    pub control_messages: u64,
}

impl TransportSnapshot {
    /// Points lost to backpressure
    pub fn points_lost(&self) -> u64 {
        self.points_dropped_full + self.points_evicted
    }
}
