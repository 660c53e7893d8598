//! Shared fixtures for the synchronizer tests

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tether_core::{
    DeletedEntity, Discovery, IdentityCache, MetricFilter, MetricIdentity, MetricInfo,
    ServiceDescriptor, ServiceIdentity, SharedDiscovery, SyncObserver, SyncSignals, ThresholdMap,
};
use tether_registry::{MemoryRegistry, Registry};

use crate::context::SyncContext;

/// Observer that records notifications and forgets deleted services
pub struct RecordingObserver {
    discovery: Arc<SharedDiscovery>,
    pub deleted: Mutex<Vec<DeletedEntity>>,
    pub thresholds: Mutex<Vec<ThresholdMap>>,
    pub alerting: Mutex<Vec<bool>>,
}

impl SyncObserver for RecordingObserver {
    fn on_entity_deleted(&self, entities: &[DeletedEntity]) {
        let services: Vec<ServiceIdentity> = entities
            .iter()
            .filter_map(|entity| match entity {
                DeletedEntity::Service(identity) => Some(identity.clone()),
                _ => None,
            })
            .collect();
        self.discovery.remove_services(&services);
        self.deleted.lock().extend_from_slice(entities);
    }

    fn on_thresholds_updated(&self, thresholds: &ThresholdMap) {
        self.thresholds.lock().push(thresholds.clone());
    }

    fn on_alerting_mode(&self, enabled: bool) {
        self.alerting.lock().push(enabled);
    }
}

pub struct Harness {
    pub ctx: SyncContext,
    pub cache: Arc<IdentityCache>,
    pub registry: Arc<MemoryRegistry>,
    pub discovery: Arc<SharedDiscovery>,
    pub observer: Arc<RecordingObserver>,
    pub signals: Arc<SyncSignals>,
    pub filter: Arc<MetricFilter>,
}

impl Harness {
    /// Fresh agent, not registered
    pub fn new() -> Self {
        Self::with_cache(IdentityCache::in_memory())
    }

    pub fn with_cache(cache: IdentityCache) -> Self {
        let signals = Arc::new(SyncSignals::new());
        let cache = Arc::new(cache);
        let registry = Arc::new(MemoryRegistry::new().with_registration_key("acc", "key"));
        let discovery = Arc::new(SharedDiscovery::new(Arc::clone(&signals)));
        let observer = Arc::new(RecordingObserver {
            discovery: Arc::clone(&discovery),
            deleted: Mutex::new(Vec::new()),
            thresholds: Mutex::new(Vec::new()),
            alerting: Mutex::new(Vec::new()),
        });
        let filter = Arc::new(MetricFilter::new(vec!["agent_status".to_string()]));

        let ctx = SyncContext {
            cache: Arc::clone(&cache),
            registry: Arc::clone(&registry) as Arc<dyn Registry>,
            discovery: Arc::clone(&discovery) as Arc<dyn Discovery>,
            observer: Arc::clone(&observer) as Arc<dyn SyncObserver>,
            signals: Arc::clone(&signals),
            filter: Arc::clone(&filter),
            account_id: "acc".to_string(),
        };

        Self {
            ctx,
            cache,
            registry,
            discovery,
            observer,
            signals,
            filter,
        }
    }

    /// Agent already registered as `agent-1`
    pub fn registered() -> Self {
        let harness = Self::new();
        harness.cache.set_agent_id("agent-1").unwrap();
        harness.cache.ensure_password(|| "secret".into()).unwrap();
        harness.registry.authenticate("agent-1", "secret");
        harness
    }

    pub fn set_fact(&self, key: &str, value: &str) {
        let mut facts = self.discovery.facts();
        facts.insert(key.to_string(), value.to_string());
        self.discovery.set_facts(facts);
    }

    pub fn add_service(&self, name: &str, descriptor: ServiceDescriptor) {
        self.discovery
            .upsert_service(ServiceIdentity::new(name), descriptor);
    }

    pub fn set_containers(&self, containers: &[(&str, Value)]) {
        let map: BTreeMap<String, Value> = containers
            .iter()
            .map(|(name, inspect)| (name.to_string(), inspect.clone()))
            .collect();
        self.discovery.set_containers(map);
    }

    /// What the emitter does for every point
    pub fn emit(&self, identity: &MetricIdentity, info: MetricInfo) {
        self.cache.record_info(identity, info).unwrap();
    }

    pub fn deleted(&self) -> Vec<DeletedEntity> {
        self.observer.deleted.lock().clone()
    }
}
