//! Metric points as produced locally and sent on the wire

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identity::MetricIdentity;

/// Label of the metric reporting the agent's own health
pub const AGENT_STATUS: &str = "agent_status";

/// One metric sample
///
/// Fields not known to the agent are kept in `extra` and forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Metric label
    pub measurement: String,

    /// Unix timestamp in seconds
    pub time: f64,

    pub value: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,

    /// Check status ("ok", "warning", "critical", "unknown")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MetricPoint {
    /// Point for `identity` timestamped now
    pub fn new(identity: &MetricIdentity, value: f64) -> Self {
        Self::at(identity, value, now_secs())
    }

    pub fn at(identity: &MetricIdentity, value: f64, time: f64) -> Self {
        Self {
            measurement: identity.label.clone(),
            time,
            value,
            service: identity.service.clone(),
            item: identity.item.clone(),
            status: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn identity(&self) -> MetricIdentity {
        MetricIdentity {
            label: self.measurement.clone(),
            service: self.service.clone(),
            item: self.item.clone(),
        }
    }

    pub fn has_status(&self) -> bool {
        self.status.is_some()
    }
}

/// Current time as fractional Unix seconds
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
