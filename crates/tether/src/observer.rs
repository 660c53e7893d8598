//! Applies what the synchronizer learned from the registry to local state

use std::sync::Arc;

use tether_core::{DeletedEntity, ServiceIdentity, SharedDiscovery, SyncObserver, ThresholdMap};
use tracing::info;

/// Drops remotely deleted services from discovery and logs registry changes
pub struct AgentObserver {
    discovery: Arc<SharedDiscovery>,
}

impl AgentObserver {
    pub fn new(discovery: Arc<SharedDiscovery>) -> Self {
        Self { discovery }
    }
}

impl SyncObserver for AgentObserver {
    fn on_entity_deleted(&self, entities: &[DeletedEntity]) {
        let services: Vec<ServiceIdentity> = entities
            .iter()
            .filter_map(|entity| match entity {
                DeletedEntity::Service(identity) => Some(identity.clone()),
                _ => None,
            })
            .collect();
        let removed = self.discovery.remove_services(&services);

        for entity in entities {
            match entity {
                DeletedEntity::Metric(identity) => {
                    info!(metric = %identity, "metric deleted on the platform")
                }
                DeletedEntity::Service(identity) => {
                    info!(service = %identity, "service deleted on the platform")
                }
                DeletedEntity::Container(name) => {
                    info!(container = %name, "container deleted on the platform")
                }
            }
        }

        if removed > 0 {
            info!(services = removed, "removed deleted services from discovery");
        }
    }

    fn on_thresholds_updated(&self, thresholds: &ThresholdMap) {
        let active = thresholds.values().filter(|t| !t.is_empty()).count();
        info!(metrics = thresholds.len(), active, "thresholds updated");
    }

    fn on_alerting_mode(&self, enabled: bool) {
        if enabled {
            info!("alerting mode enabled, only status metrics are sent");
        } else {
            info!("alerting mode disabled");
        }
    }
}
