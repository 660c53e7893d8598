//! Local discovery input and the observer notified by the synchronizer
//!
//! Discovery sources (service detection, container runtime, fact gathering)
//! live outside the engine. They publish what they see into a
//! [`SharedDiscovery`]; the synchronizer reads it through the [`Discovery`]
//! trait.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::identity::{MetricIdentity, ServiceIdentity};
use crate::registration::{ServiceDescriptor, ThresholdMap};
use crate::signal::SyncSignals;

/// Current local view of services, containers and host facts
pub trait Discovery: Send + Sync {
    fn services(&self) -> BTreeMap<ServiceIdentity, ServiceDescriptor>;

    /// Container inspect documents keyed by container name
    fn containers(&self) -> BTreeMap<String, Value>;

    fn facts(&self) -> BTreeMap<String, String>;

    /// Bumped on every change
    fn version(&self) -> u64;
}

/// An entity removed from the cache by the synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletedEntity {
    Metric(MetricIdentity),
    Service(ServiceIdentity),
    Container(String),
}

/// Collaborators told about what the synchronizer learned from the registry
pub trait SyncObserver: Send + Sync {
    fn on_entity_deleted(&self, entities: &[DeletedEntity]);

    fn on_thresholds_updated(&self, thresholds: &ThresholdMap);

    fn on_alerting_mode(&self, _enabled: bool) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_entity_deleted(&self, _entities: &[DeletedEntity]) {}

    fn on_thresholds_updated(&self, _thresholds: &ThresholdMap) {}
}

#[derive(Debug, Default)]
struct DiscoveryState {
    services: BTreeMap<ServiceIdentity, ServiceDescriptor>,
    containers: BTreeMap<String, Value>,
    facts: BTreeMap<String, String>,
}

/// In-process [`Discovery`] updated by discovery sources
///
/// Service and container changes wake the synchronizer. Fact changes only
/// bump the version; facts are picked up on the next tick.
#[derive(Debug)]
pub struct SharedDiscovery {
    state: RwLock<DiscoveryState>,
    version: AtomicU64,
    signals: Arc<SyncSignals>,
}

impl SharedDiscovery {
    pub fn new(signals: Arc<SyncSignals>) -> Self {
        Self {
            state: RwLock::new(DiscoveryState::default()),
            version: AtomicU64::new(0),
            signals,
        }
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Replace the discovered services; returns whether they changed
    pub fn set_services(&self, services: BTreeMap<ServiceIdentity, ServiceDescriptor>) -> bool {
        {
            let mut state = self.state.write();
            if state.services == services {
                return false;
            }
            state.services = services;
        }
        self.bump();
        self.signals.notify_discovery_changed();
        true
    }

    /// Add or replace one service
    pub fn upsert_service(&self, identity: ServiceIdentity, descriptor: ServiceDescriptor) -> bool {
        {
            let mut state = self.state.write();
            if state.services.get(&identity) == Some(&descriptor) {
                return false;
            }
            state.services.insert(identity, descriptor);
        }
        self.bump();
        self.signals.notify_discovery_changed();
        true
    }

    pub fn remove_services(&self, identities: &[ServiceIdentity]) -> usize {
        let removed = {
            let mut state = self.state.write();
            identities
                .iter()
                .filter(|identity| state.services.remove(*identity).is_some())
                .count()
        };
        if removed > 0 {
            self.bump();
            self.signals.notify_discovery_changed();
        }
        removed
    }

    /// Replace the discovered containers; returns whether they changed
    pub fn set_containers(&self, containers: BTreeMap<String, Value>) -> bool {
        {
            let mut state = self.state.write();
            if state.containers == containers {
                return false;
            }
            state.containers = containers;
        }
        self.bump();
        self.signals.notify_discovery_changed();
        true
    }

    /// Replace the host facts; returns whether they changed
    pub fn set_facts(&self, facts: BTreeMap<String, String>) -> bool {
        {
            let mut state = self.state.write();
            if state.facts == facts {
                return false;
            }
            state.facts = facts;
        }
        self.bump();
        true
    }
}

impl Discovery for SharedDiscovery {
    fn services(&self) -> BTreeMap<ServiceIdentity, ServiceDescriptor> {
        self.state.read().services.clone()
    }

    fn containers(&self) -> BTreeMap<String, Value> {
        self.state.read().containers.clone()
    }

    fn facts(&self) -> BTreeMap<String, String> {
        self.state.read().facts.clone()
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
