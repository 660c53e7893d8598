//! Local identities of synchronized entities
//!
//! An identity is the stable key an entity has before (and after) the
//! registry assigns it a remote identifier.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Identity of a metric: label, owning service and item
///
/// `item` disambiguates several instances of the same label
/// (one per disk, per network interface, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricIdentity {
    pub label: String,
    pub service: Option<String>,
    pub item: Option<String>,
}

impl MetricIdentity {
    /// Identity of a metric with no service and no item
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            service: None,
            item: None,
        }
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[must_use]
    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }

    /// Identity of the metric `label` sharing this metric's service and item
    pub fn sibling(&self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            service: self.service.clone(),
            item: self.item.clone(),
        }
    }
}

impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)?;
        if let Some(service) = &self.service {
            write!(f, "[service={}]", service)?;
        }
        if let Some(item) = &self.item {
            write!(f, "[item={}]", item)?;
        }
        Ok(())
    }
}

/// Identity of a discovered service: name plus optional instance
///
/// The instance is set for services running inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub instance: Option<String>,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
        }
    }

    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{} ({})", self.name, instance),
            None => f.write_str(&self.name),
        }
    }
}

/// Side metadata needed to register a metric
///
/// Only known for metrics emitted since process start; never persisted.
#[derive(Debug, Clone)]
pub struct MetricInfo {
    /// Label of the metric this one is the status of
    pub status_of: Option<String>,

    /// Name of the container the metric belongs to
    pub container: Option<String>,

    /// Instance of the owning service
    pub instance: Option<String>,

    first_seen: Instant,
}

impl Default for MetricInfo {
    fn default() -> Self {
        Self {
            status_of: None,
            container: None,
            instance: None,
            first_seen: Instant::now(),
        }
    }
}

impl MetricInfo {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status_of(mut self, label: impl Into<String>) -> Self {
        self.status_of = Some(label.into());
        self
    }

    #[must_use]
    pub fn container(mut self, name: impl Into<String>) -> Self {
        self.container = Some(name.into());
        self
    }

    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// When this info was first recorded
    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    /// Parent metric of a status metric: `(status_of, service, item)`
    pub fn parent(&self, identity: &MetricIdentity) -> Option<MetricIdentity> {
        self.status_of
            .as_ref()
            .map(|label| identity.sibling(label.clone()))
    }

    /// Identity of the owning service, if the metric has one
    pub fn service(&self, identity: &MetricIdentity) -> Option<ServiceIdentity> {
        identity.service.as_ref().map(|name| ServiceIdentity {
            name: name.clone(),
            instance: self.instance.clone(),
        })
    }
}
