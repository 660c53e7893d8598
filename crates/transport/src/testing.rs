//! Shared fixtures for the transport tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_config::MqttConfig;
use tether_core::{Discovery, SharedDiscovery, SyncSignals};
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::metrics::TransportMetrics;
use crate::transport::{Link, Transport, TransportEvent};

/// Link that records everything instead of talking to a broker
#[derive(Default)]
pub struct RecordingLink {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub subscribed: Mutex<Vec<String>>,
    pub disconnected: AtomicBool,
    /// Number of upcoming publishes that fail
    pub failures: AtomicUsize,
}

impl RecordingLink {
    pub fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Payloads published on `topic`, decoded as JSON
    pub fn payloads(&self, topic: &str) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl Link for RecordingLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            let error = serde_json::from_str::<serde_json::Value>("link down").unwrap_err();
            return Err(TransportError::Encode(error));
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscribed.lock().push(topic.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Fixture {
    pub link: Arc<RecordingLink>,
    pub transport: Transport,
    pub events: mpsc::Sender<TransportEvent>,
    pub signals: Arc<SyncSignals>,
    pub discovery: Arc<SharedDiscovery>,
    pub metrics: Arc<TransportMetrics>,
}

impl Fixture {
    pub fn new(max_in_flight: usize) -> Self {
        let config = MqttConfig {
            max_in_flight,
            ..Default::default()
        };
        let link = Arc::new(RecordingLink::default());
        let signals = Arc::new(SyncSignals::new());
        let discovery = Arc::new(SharedDiscovery::new(Arc::clone(&signals)));
        let metrics = Arc::new(TransportMetrics::new());
        let (events, rx) = mpsc::channel(16);

        let transport = Transport::new(
            Arc::clone(&link) as Arc<dyn Link>,
            "agent-1",
            &config,
            rx,
            Arc::clone(&signals),
            Arc::clone(&discovery) as Arc<dyn Discovery>,
            Arc::clone(&metrics),
        );

        Self {
            link,
            transport,
            events,
            signals,
            discovery,
            metrics,
        }
    }

    pub fn set_public_ip(&self, ip: &str) {
        let mut facts = self.discovery.facts();
        facts.insert("public_ip".to_string(), ip.to_string());
        self.discovery.set_facts(facts);
    }

    /// Fixture already connected, with the connect message sent and acknowledged
    pub async fn connected(max_in_flight: usize) -> Self {
        let mut fixture = Self::new(max_in_flight);
        fixture
            .transport
            .handle_event(TransportEvent::Connected)
            .await;
        fixture.transport.in_flight().reset();
        fixture
    }
}
