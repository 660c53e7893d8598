//! Transport state machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Disconnecting
//!       ▲               │              │
//!       └───────────────┴──────────────┘  (connection lost)
//! ```
//!
//! The MQTT event pump reports connection changes and control messages as
//! [`TransportEvent`]s; [`Transport::run`] applies them. Publishing goes
//! through a [`TransportHandle`], which enforces the in-flight ceiling:
//! every publish takes a slot, every broker acknowledgment frees one, and
//! above the ceiling new messages are dropped unless forced.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tether_config::MqttConfig;
use tether_core::{Discovery, SyncSignals};
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::TransportMetrics;
use crate::wire::{self, CLEAN_SHUTDOWN, ControlMessage, Topics};

/// Fact published in the connect message
const PUBLIC_IP_FACT: &str = "public_ip";

/// Publish/subscribe primitives of the underlying connection
#[async_trait]
pub trait Link: Send + Sync {
    /// Queue a QoS 1 publish
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// What the event pump observed on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection attempt started
    Connecting,
    /// The broker accepted the connection
    Connected,
    ConnectionLost(String),
    /// Payload received on the notification topic
    Control(Bytes),
}

/// Unacknowledged publish counter with a ceiling
#[derive(Debug)]
pub struct InFlight {
    count: AtomicUsize,
    ceiling: usize,
    idle: Notify,
}

impl InFlight {
    pub fn new(ceiling: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            ceiling,
            idle: Notify::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn is_saturated(&self) -> bool {
        self.count() >= self.ceiling
    }

    /// Take a slot; forced acquisitions ignore the ceiling
    pub fn try_acquire(&self, forced: bool) -> bool {
        if forced {
            self.count.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.ceiling).then_some(count + 1)
            })
            .is_ok()
    }

    /// Free a slot (broker acknowledgment or failed publish)
    pub fn release(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        if previous <= 1 {
            self.idle.notify_waiters();
        }
    }

    /// Forget outstanding publishes; used when a new session starts
    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
        self.idle.notify_waiters();
    }

    /// Wait until nothing is in flight; returns false on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

struct Inner {
    link: Arc<dyn Link>,
    topics: Topics,
    state: watch::Sender<TransportState>,
    in_flight: Arc<InFlight>,
    metrics: Arc<TransportMetrics>,
}

/// Publishing side of the transport; cheap to clone
#[derive(Clone)]
pub struct TransportHandle {
    inner: Arc<Inner>,
}

impl TransportHandle {
    pub fn state(&self) -> TransportState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.inner.in_flight
    }

    fn set_state(&self, state: TransportState) {
        self.inner.state.send_replace(state);
    }

    /// Publish a message; returns false if it was dropped
    ///
    /// Unforced messages are dropped while disconnected or when the
    /// in-flight ceiling is reached.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, forced: bool) -> Result<bool> {
        let inner = &self.inner;
        if !forced && !self.is_connected() {
            inner.metrics.record_dropped_offline();
            return Ok(false);
        }
        if !inner.in_flight.try_acquire(forced) {
            inner.metrics.record_dropped_in_flight();
            return Ok(false);
        }

        match inner.link.publish(topic, payload).await {
            Ok(()) => Ok(true),
            Err(e) => {
                inner.in_flight.release();
                inner.metrics.record_publish_error();
                Err(e)
            }
        }
    }

    /// Publish an encoded batch of `points` points on the data topic
    pub async fn publish_data(&self, payload: Vec<u8>, points: usize) -> Result<bool> {
        let sent = self
            .publish(&self.inner.topics.data, payload, false)
            .await?;
        if sent {
            self.inner.metrics.record_batch_sent(points);
        }
        Ok(sent)
    }

    /// Stop the transport
    ///
    /// Announces the disconnection when `announce` is set, waits up to
    /// `ack_timeout` for outstanding acknowledgments, then disconnects.
    pub async fn shutdown(&self, announce: bool, ack_timeout: Duration) {
        let was_connected = self.is_connected();
        self.set_state(TransportState::Disconnecting);

        if announce && was_connected {
            let payload = wire::disconnect_payload(CLEAN_SHUTDOWN);
            if let Err(e) = self
                .publish(&self.inner.topics.disconnect, payload, true)
                .await
            {
                warn!(error = %e, "failed to send disconnect message");
            }
        }

        if !self.inner.in_flight.wait_idle(ack_timeout).await {
            warn!(
                in_flight = self.inner.in_flight.count(),
                "messages still unacknowledged at shutdown"
            );
        }

        if let Err(e) = self.inner.link.disconnect().await {
            debug!(error = %e, "disconnect failed");
        }
        self.set_state(TransportState::Disconnected);
    }
}

/// Applies connection events and control messages
pub struct Transport {
    handle: TransportHandle,
    events: mpsc::Receiver<TransportEvent>,
    signals: Arc<SyncSignals>,
    discovery: Arc<dyn Discovery>,
    control_limit: usize,
}

impl Transport {
    pub fn new(
        link: Arc<dyn Link>,
        agent_id: &str,
        config: &MqttConfig,
        events: mpsc::Receiver<TransportEvent>,
        signals: Arc<SyncSignals>,
        discovery: Arc<dyn Discovery>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(TransportState::Disconnected);
        Self {
            handle: TransportHandle {
                inner: Arc::new(Inner {
                    link,
                    topics: Topics::for_agent(agent_id),
                    state,
                    in_flight: Arc::new(InFlight::new(config.max_in_flight)),
                    metrics,
                }),
            },
            events,
            signals,
            discovery,
            control_limit: config.control_payload_limit,
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Counter the event pump releases on acknowledgments
    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.handle.inner.in_flight)
    }

    /// Apply events until `cancel` fires or the pump goes away
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        debug!("transport event loop stopped");
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        let handle = &self.handle;
        let metrics = &handle.inner.metrics;
        let stopping = handle.state() == TransportState::Disconnecting;

        match event {
            TransportEvent::Connecting => {
                if !stopping {
                    handle.set_state(TransportState::Connecting);
                }
            }
            TransportEvent::Connected => {
                if stopping {
                    return;
                }
                metrics.record_connected();
                handle.inner.in_flight.reset();
                handle.set_state(TransportState::Connected);
                info!("connected to the platform");
                self.on_connected().await;
            }
            TransportEvent::ConnectionLost(reason) => {
                if stopping {
                    return;
                }
                if handle.state() == TransportState::Connected {
                    metrics.record_disconnected();
                    warn!(reason = %reason, "connection to the platform lost");
                } else {
                    debug!(reason = %reason, "connection attempt failed");
                }
                handle.set_state(TransportState::Disconnected);
            }
            TransportEvent::Control(payload) => {
                metrics.record_control_message();
                match wire::parse_control(&payload, self.control_limit) {
                    Ok(ControlMessage::Resync) => {
                        info!("resynchronization requested by the platform");
                        self.signals.request_resync();
                    }
                    Ok(ControlMessage::Unknown(message_type)) => {
                        debug!(message_type = %message_type, "ignoring notification");
                    }
                    Err(e) => {
                        warn!(error = %e, "ignoring invalid notification");
                    }
                }
            }
        }
    }

    /// Announce the connection and listen for notifications
    async fn on_connected(&self) {
        let handle = &self.handle;
        let topics = &handle.inner.topics;
        let public_ip = self.discovery.facts().get(PUBLIC_IP_FACT).cloned();

        let payload = wire::connect_payload(public_ip.as_deref());
        if let Err(e) = handle.publish(&topics.connect, payload, true).await {
            warn!(error = %e, "failed to send connect message");
        }
        if let Err(e) = handle.inner.link.subscribe(&topics.notification).await {
            warn!(error = %e, "failed to subscribe to notifications");
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
