//! Wire formats of the MQTT link
//!
//! All topics live under `v1/agent/<agent id>/`:
//!
//! | topic          | direction | payload                                   |
//! |----------------|-----------|-------------------------------------------|
//! | `data`         | out       | JSON array of points, each with `uuid`    |
//! | `connect`      | out       | `{"public_ip": ..}`                       |
//! | `disconnect`   | out       | `{"disconnect-cause": ..}` (also the will)|
//! | `notification` | in        | `{"message_type": ..}`                    |

use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_core::MetricPoint;

use crate::error::{Result, TransportError};

/// Cause sent on a graceful stop
pub const CLEAN_SHUTDOWN: &str = "Clean shutdown";

/// Cause the broker publishes when the connection dies
pub const WILL_CAUSE: &str = "disconnect-will";

/// Topics of one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub data: String,
    pub connect: String,
    pub disconnect: String,
    pub notification: String,
}

impl Topics {
    pub fn for_agent(agent_id: &str) -> Self {
        let prefix = format!("v1/agent/{}", agent_id);
        Self {
            data: format!("{}/data", prefix),
            connect: format!("{}/connect", prefix),
            disconnect: format!("{}/disconnect", prefix),
            notification: format!("{}/notification", prefix),
        }
    }
}

pub fn connect_payload(public_ip: Option<&str>) -> Vec<u8> {
    json!({ "public_ip": public_ip }).to_string().into_bytes()
}

pub fn disconnect_payload(cause: &str) -> Vec<u8> {
    json!({ "disconnect-cause": cause }).to_string().into_bytes()
}

/// A point ready for delivery, tagged with its remote metric identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPoint {
    #[serde(flatten)]
    pub point: MetricPoint,
    pub uuid: String,
}

/// Serialize a batch as one JSON array
pub fn encode_batch(points: &[ResolvedPoint]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(points)?)
}

/// Message received on the notification topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Full reconciliation requested
    Resync,
    /// A message type this agent does not handle
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    message_type: String,
}

/// Decode a notification; payloads of `limit` bytes or more are refused
pub fn parse_control(payload: &[u8], limit: usize) -> Result<ControlMessage> {
    if payload.len() >= limit {
        return Err(TransportError::PayloadTooLarge {
            size: payload.len(),
            limit,
        });
    }

    let envelope: Envelope = serde_json::from_slice(payload)
        .map_err(|e| TransportError::InvalidControl(e.to_string()))?;

    Ok(match envelope.message_type.as_str() {
        "resync" => ControlMessage::Resync,
        _ => ControlMessage::Unknown(envelope.message_type),
    })
}
