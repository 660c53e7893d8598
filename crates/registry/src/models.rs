//! Request and response bodies of the registry API

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{ServiceDescriptor, Threshold, ThresholdKey};

/// One page of a list endpoint
///
/// Older endpoints return a bare array instead of a paginated object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Page<T> {
    Paginated {
        results: Vec<T>,
        #[serde(default)]
        next: Option<String>,
    },
    List(Vec<T>),
}

impl<T> Page<T> {
    /// Items of this page and the URL of the next one
    pub fn into_parts(self) -> (Vec<T>, Option<String>) {
        match self {
            Self::Paginated { results, next } => (results, next.filter(|n| !n.is_empty())),
            Self::List(items) => (items, None),
        }
    }
}

/// Body of the agent registration call
#[derive(Debug, Clone, Serialize)]
pub struct AgentRegistration {
    pub account: String,
    pub initial_password: String,
    pub display_name: String,
    pub fqdn: String,
}

/// Agent record as returned by the registry
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAgent {
    pub id: String,
    #[serde(default)]
    pub alerting_mode: bool,
}

/// Any entity of which only the identifier matters
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEntity {
    pub id: String,
}

/// Body of service create and update calls
#[derive(Debug, Clone, Serialize)]
pub struct ServicePayload {
    #[serde(flatten)]
    pub descriptor: ServiceDescriptor,
    pub account: String,
    pub agent: String,
}

/// Body of the metric registration call
///
/// Dependencies are remote identifiers, resolved before the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricPayload {
    pub agent: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_of: Option<String>,
}

/// Metric record as returned by registration and list calls
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteMetric {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub last_status: Option<Value>,
    #[serde(default)]
    pub threshold_low_warning: Option<f64>,
    #[serde(default)]
    pub threshold_low_critical: Option<f64>,
    #[serde(default)]
    pub threshold_high_warning: Option<f64>,
    #[serde(default)]
    pub threshold_high_critical: Option<f64>,
}

impl RemoteMetric {
    /// The registry uses "" for "no item"
    pub fn item(&self) -> Option<&str> {
        self.item.as_deref().filter(|item| !item.is_empty())
    }

    pub fn has_status(&self) -> bool {
        self.last_status.as_ref().is_some_and(|status| !status.is_null())
    }

    pub fn threshold_key(&self) -> ThresholdKey {
        ThresholdKey::new(self.label.clone(), self.item().map(str::to_string))
    }

    pub fn threshold(&self) -> Threshold {
        Threshold {
            low_warning: self.threshold_low_warning,
            low_critical: self.threshold_low_critical,
            high_warning: self.threshold_high_warning,
            high_critical: self.threshold_high_critical,
        }
    }
}

/// Body of container create and update calls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerPayload {
    pub host: String,
    pub name: String,
    pub command: String,
    pub docker_status: String,
    pub docker_created_at: Option<String>,
    pub docker_started_at: Option<String>,
    pub docker_finished_at: Option<String>,
    pub docker_api_version: String,
    pub docker_id: String,
    pub docker_image_id: String,
    pub docker_image_name: String,
    /// The inspect document, JSON encoded
    pub docker_inspect: String,
}

/// Docker reports "never" as the zero time
const ZERO_DOCKER_DATE: &str = "0001-01-01T00:00:00Z";

fn docker_date(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|date| *date != ZERO_DOCKER_DATE)
        .map(str::to_string)
}

fn str_at<'a>(inspect: &'a Value, pointer: &str) -> &'a str {
    inspect.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

impl ContainerPayload {
    /// Build the payload from a container inspect document
    pub fn from_inspect(agent_id: &str, name: &str, inspect: &Value, api_version: &str) -> Self {
        let command = inspect
            .pointer("/Config/Cmd")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        Self {
            host: agent_id.to_string(),
            name: name.to_string(),
            command,
            docker_status: str_at(inspect, "/State/Status").to_string(),
            docker_created_at: docker_date(inspect.get("Created")),
            docker_started_at: docker_date(inspect.pointer("/State/StartedAt")),
            docker_finished_at: docker_date(inspect.pointer("/State/FinishedAt")),
            docker_api_version: api_version.to_string(),
            docker_id: str_at(inspect, "/Id").to_string(),
            docker_image_id: str_at(inspect, "/Image").to_string(),
            docker_image_name: str_at(inspect, "/Config/Image").to_string(),
            docker_inspect: inspect.to_string(),
        }
    }
}

/// Body of the fact creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactPayload {
    pub agent: String,
    pub key: String,
    pub value: String,
}

/// Fact record as returned by the registry
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFact {
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}
