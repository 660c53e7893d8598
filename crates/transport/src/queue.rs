//! Bounded outbound queue
//!
//! Producers never wait: when the queue is full the point is dropped and
//! counted.

use std::sync::Arc;

use tether_core::MetricPoint;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::metrics::TransportMetrics;

/// Create a queue holding at most `capacity` points
pub fn queue(capacity: usize, metrics: Arc<TransportMetrics>) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx, metrics }, QueueReceiver { rx })
}

/// Producer side; cheap to clone
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<MetricPoint>,
    metrics: Arc<TransportMetrics>,
}

impl QueueSender {
    /// Enqueue without blocking; returns false if the point was dropped
    pub fn push(&self, point: MetricPoint) -> bool {
        match self.tx.try_send(point) {
            Ok(()) => {
                self.metrics.record_queued();
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.metrics.record_dropped_full();
                false
            }
        }
    }

    /// Points currently queued
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer side, owned by the drain loop
pub struct QueueReceiver {
    rx: mpsc::Receiver<MetricPoint>,
}

impl QueueReceiver {
    /// Next point; `None` once every sender is gone and the queue is empty
    pub async fn recv(&mut self) -> Option<MetricPoint> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MetricPoint> {
        self.rx.try_recv().ok()
    }
}
