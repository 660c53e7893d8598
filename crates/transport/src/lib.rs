//! Tether Transport - Outbound metric path
//!
//! Producers hand points to a [`MetricEmitter`], which caches their metadata
//! and pushes them on a bounded queue. A [`DrainLoop`] reads the queue in
//! batches, attaches the remote metric identifier of each point and publishes
//! the batch through the [`Transport`]. Points whose metric is not registered
//! yet wait in a bounded pending set.
//!
//! # Modules
//!
//! - [`queue`] - bounded producer queue
//! - [`emitter`] - producer entry point
//! - [`drain`] - batching and resolution of queued points
//! - [`transport`] - connection state machine and in-flight ceiling
//! - [`mqtt`] - rumqttc link and event pump
//! - [`wire`] - topics and payload encoding
//! - [`metrics`] - transport counters

pub mod drain;
pub mod emitter;
pub mod error;
pub mod metrics;
pub mod mqtt;
pub mod queue;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod testing;

pub use drain::{CycleReport, DrainLoop};
pub use emitter::{EmitOutcome, MetricEmitter};
pub use error::{Result, TransportError};
pub use metrics::{TransportMetrics, TransportSnapshot};
pub use mqtt::{EventPump, MqttLink, session};
pub use queue::{QueueReceiver, QueueSender, queue};
pub use transport::{InFlight, Link, Transport, TransportEvent, TransportHandle, TransportState};
pub use wire::{ControlMessage, ResolvedPoint, Topics};
