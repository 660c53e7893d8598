//! MQTT link to the platform broker (rumqttc)
//!
//! [`session`] builds the client and its event loop. The client side is
//! wrapped in [`MqttLink`]; the event loop is driven by [`EventPump`], which
//! turns broker events into [`TransportEvent`]s, frees in-flight slots on
//! PUBACK and reconnects with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tether_config::MqttConfig;
use tether_core::{Backoff, login_name};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::transport::{InFlight, Link, TransportEvent};
use crate::wire::{self, Topics, WILL_CAUSE};

/// Capacity of the client's request channel
const REQUEST_CAPACITY: usize = 100;

/// Largest packet accepted from the broker; bigger control messages are
/// still rejected by the control payload limit
const MAX_INCOMING_PACKET: usize = 1024 * 1024;

/// Largest packet sent; a full data batch fits comfortably
const MAX_OUTGOING_PACKET: usize = 16 * 1024 * 1024;

/// rumqttc refuses keep-alives under one second
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Connection options for `agent_id`
pub fn options(config: &MqttConfig, agent_id: &str, password: &str) -> Result<MqttOptions> {
    let topics = Topics::for_agent(agent_id);

    let mut options = MqttOptions::new(agent_id, config.host.clone(), config.port);
    options
        .set_keep_alive(config.keep_alive.max(MIN_KEEP_ALIVE))
        .set_clean_session(true)
        .set_credentials(login_name(agent_id), password)
        .set_last_will(LastWill::new(
            topics.disconnect,
            wire::disconnect_payload(WILL_CAUSE),
            QoS::AtLeastOnce,
            false,
        ))
        .set_inflight(config.max_in_flight.clamp(1, u16::MAX as usize) as u16)
        .set_max_packet_size(MAX_INCOMING_PACKET, MAX_OUTGOING_PACKET);

    if config.ssl {
        let transport = match &config.cafile {
            Some(path) => {
                let ca = std::fs::read(path).map_err(|source| TransportError::CaFile {
                    path: path.clone(),
                    source,
                })?;
                rumqttc::Transport::tls(ca, None, None)
            }
            None => rumqttc::Transport::tls_with_default_config(),
        };
        options.set_transport(transport);
    }

    Ok(options)
}

/// Create the MQTT client and its (not yet started) event loop
pub fn session(config: &MqttConfig, agent_id: &str, password: &str) -> Result<(MqttLink, EventLoop)> {
    let options = options(config, agent_id, password)?;
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    Ok((MqttLink { client }, eventloop))
}

/// [`Link`] over a rumqttc client; every publish is QoS 1
pub struct MqttLink {
    client: AsyncClient,
}

#[async_trait]
impl Link for MqttLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}

/// Drives the rumqttc event loop
pub struct EventPump {
    eventloop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    in_flight: Arc<InFlight>,
    notification_topic: String,
    backoff: Backoff,
}

impl EventPump {
    pub fn new(
        eventloop: EventLoop,
        events: mpsc::Sender<TransportEvent>,
        in_flight: Arc<InFlight>,
        agent_id: &str,
        config: &MqttConfig,
    ) -> Self {
        Self {
            eventloop,
            events,
            in_flight,
            notification_topic: Topics::for_agent(agent_id).notification,
            backoff: Backoff::new(config.reconnect_initial, config.reconnect_max),
        }
    }

    /// Forward an event; false once the transport is gone
    // Borrows only the sender so the pump future stays `Send`
    fn emit(&self, event: TransportEvent) -> impl Future<Output = bool> + Send + '_ {
        let events = &self.events;
        async move { events.send(event).await.is_ok() }
    }

    /// Poll the connection until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        if !self.emit(TransportEvent::Connecting).await {
            return;
        }

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            let forwarded = match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.backoff.reset();
                    self.emit(TransportEvent::Connected).await
                }
                Ok(Event::Incoming(Packet::PubAck(_))) => {
                    self.in_flight.release();
                    true
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == self.notification_topic {
                        self.emit(TransportEvent::Control(publish.payload)).await
                    } else {
                        debug!(topic = %publish.topic, "message on unexpected topic");
                        true
                    }
                }
                Ok(_) => true,
                Err(e) => {
                    if !self.emit(TransportEvent::ConnectionLost(e.to_string())).await {
                        break;
                    }
                    let delay = self.backoff.next_delay();
                    debug!(retry_in = ?delay, "reconnecting to the broker");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.emit(TransportEvent::Connecting).await
                }
            };

            if !forwarded {
                break;
            }
        }

        debug!("mqtt event pump stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options() {
        let config = MqttConfig {
            ssl: false,
            keep_alive: Duration::from_secs(30),
            ..Default::default()
        };
        let options = options(&config, "a1b2", "secret").unwrap();

        assert_eq!(options.client_id(), "a1b2");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert_eq!(
            options.credentials(),
            Some(("a1b2@bleemeo.com".to_string(), "secret".to_string()))
        );

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "v1/agent/a1b2/disconnect");
        let cause: serde_json::Value = serde_json::from_slice(&will.message).unwrap();
        assert_eq!(cause["disconnect-cause"], "disconnect-will");
    }

    #[test]
    fn test_short_keep_alive_is_raised() {
        let config = MqttConfig {
            ssl: false,
            keep_alive: Duration::from_millis(200),
            ..Default::default()
        };
        let options = options(&config, "a1b2", "secret").unwrap();
        assert_eq!(options.keep_alive(), MIN_KEEP_ALIVE);
    }

    #[test]
    fn test_missing_ca_file() {
        let config = MqttConfig {
            cafile: Some("/nonexistent/tether-ca.pem".into()),
            ..Default::default()
        };
        assert!(matches!(
            options(&config, "a1b2", "secret"),
            Err(TransportError::CaFile { .. })
        ));
    }
}
