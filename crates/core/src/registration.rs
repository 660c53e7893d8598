//! Registration state cached for each entity kind

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Registration state of a metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "lowercase")]
pub enum MetricRegistration {
    /// Known locally, no remote identifier yet
    Unresolved,
    /// Registered with the given remote identifier
    Resolved(String),
    /// Removed upstream; points are dropped and the metric is not re-registered
    Deleted,
}

impl MetricRegistration {
    /// Remote identifier, if resolved
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Resolved(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// Local description of a service, as sent to the registry
///
/// Known fields are typed; anything a discovery source adds beyond them
/// goes to `extra` and is forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// Comma separated `address:port/proto` list
    #[serde(default)]
    pub listen_addresses: String,

    #[serde(default)]
    pub exe_path: String,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ServiceDescriptor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_listen_addresses(mut self, addresses: impl Into<String>) -> Self {
        self.listen_addresses = addresses.into();
        self
    }

    #[must_use]
    pub fn with_exe_path(mut self, path: impl Into<String>) -> Self {
        self.exe_path = path.into();
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

/// Cached service: the descriptor last synchronized and its remote identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub descriptor: ServiceDescriptor,
    pub id: String,
}

/// Cached container: hash of the last synchronized inspect data and its identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRegistration {
    pub inspect_hash: String,
    pub id: String,
}

/// Content hash of a container inspect document
///
/// `serde_json::Map` keeps keys sorted, so the serialization is canonical.
pub fn inspect_hash(inspect: &serde_json::Value) -> String {
    let canonical = inspect.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Key of a threshold: metric label and item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThresholdKey {
    pub label: String,
    pub item: Option<String>,
}

impl ThresholdKey {
    pub fn new(label: impl Into<String>, item: Option<String>) -> Self {
        Self {
            label: label.into(),
            item,
        }
    }
}

/// Threshold bounds configured on the registry for one metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub low_warning: Option<f64>,
    pub low_critical: Option<f64>,
    pub high_warning: Option<f64>,
    pub high_critical: Option<f64>,
}

impl Threshold {
    /// True when no bound is set
    pub fn is_empty(&self) -> bool {
        self.low_warning.is_none()
            && self.low_critical.is_none()
            && self.high_warning.is_none()
            && self.high_critical.is_none()
    }
}

pub type ThresholdMap = HashMap<ThresholdKey, Threshold>;
