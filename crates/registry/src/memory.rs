//! In-memory [`Registry`] for tests
//!
//! Behaves like the real API for the calls the agent makes: identifiers are
//! assigned on creation, deletes of unknown identifiers answer 404 and list
//! calls only return the entities of the queried agent. Failures can be
//! injected per operation to exercise retry paths.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_core::Threshold;

use crate::error::{RegistryError, Result};
use crate::models::{
    AgentRegistration, ContainerPayload, FactPayload, MetricPayload, RemoteAgent, RemoteEntity,
    RemoteFact, RemoteMetric, ServicePayload,
};
use crate::traits::Registry;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    registration: Option<(String, String)>,
    authenticated: Option<String>,
    agents: BTreeMap<String, AgentRegistration>,
    alerting_mode: bool,
    services: BTreeMap<String, ServicePayload>,
    containers: BTreeMap<String, ContainerPayload>,
    metrics: BTreeMap<String, (MetricPayload, RemoteMetric)>,
    facts: BTreeMap<String, FactPayload>,
    thresholds: HashMap<(String, Option<String>), Threshold>,
    rejected_labels: HashSet<String>,
    failures: HashMap<&'static str, (u16, Option<usize>)>,
    calls: Vec<&'static str>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Record the call and return the injected failure, if any
    fn enter(&mut self, op: &'static str) -> Result<()> {
        self.calls.push(op);

        if let Some((status, remaining)) = self.failures.get_mut(op) {
            let status = *status;
            match remaining {
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    return Err(RegistryError::status(status, op, "injected failure"));
                }
                None => return Err(RegistryError::status(status, op, "injected failure")),
            }
        }

        if op != "register_agent" && self.authenticated.is_none() {
            return Err(RegistryError::MissingCredentials);
        }
        Ok(())
    }
}

fn not_found(op: &str, id: &str) -> RegistryError {
    RegistryError::status(404, format!("{} {}", op, id), "{\"detail\": \"Not found.\"}")
}

/// Registry living in memory
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept agent registrations with this account and key
    pub fn with_registration_key(self, account_id: &str, key: &str) -> Self {
        self.state.lock().registration = Some((account_id.to_string(), key.to_string()));
        self
    }

    // -------------------------------------------------------------------------
    // Failure injection
    // -------------------------------------------------------------------------

    /// Make every call to `op` fail with `status` until [`recover`](Self::recover)
    pub fn fail(&self, op: &'static str, status: u16) {
        self.state.lock().failures.insert(op, (status, None));
    }

    /// Make the next `times` calls to `op` fail with `status`
    pub fn fail_times(&self, op: &'static str, status: u16, times: usize) {
        self.state.lock().failures.insert(op, (status, Some(times)));
    }

    pub fn recover(&self, op: &'static str) {
        self.state.lock().failures.remove(op);
    }

    /// Answer 400 to registrations of this metric label
    pub fn reject_label(&self, label: &str) {
        self.state.lock().rejected_labels.insert(label.to_string());
    }

    // -------------------------------------------------------------------------
    // Remote-side changes
    // -------------------------------------------------------------------------

    pub fn set_alerting_mode(&self, enabled: bool) {
        self.state.lock().alerting_mode = enabled;
    }

    /// Threshold returned for metrics registered with `label` and `item`
    pub fn set_threshold(&self, label: &str, item: Option<&str>, threshold: Threshold) {
        let mut state = self.state.lock();
        let key = (label.to_string(), item.map(str::to_string));
        for (payload, metric) in state.metrics.values_mut() {
            if payload.label == key.0 && payload.item == key.1 {
                apply_threshold(metric, &threshold);
            }
        }
        state.thresholds.insert(key, threshold);
    }

    /// Set the last status of a registered metric
    pub fn set_metric_status(&self, id: &str, status: serde_json::Value) {
        if let Some((_, metric)) = self.state.lock().metrics.get_mut(id) {
            metric.last_status = Some(status);
        }
    }

    /// Delete an entity as a user would from the platform's UI
    pub fn remove_service(&self, id: &str) -> bool {
        self.state.lock().services.remove(id).is_some()
    }

    pub fn remove_container(&self, id: &str) -> bool {
        self.state.lock().containers.remove(id).is_some()
    }

    pub fn remove_metric(&self, id: &str) -> bool {
        self.state.lock().metrics.remove(id).is_some()
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn agents(&self) -> Vec<(String, AgentRegistration)> {
        let state = self.state.lock();
        state
            .agents
            .iter()
            .map(|(id, request)| (id.clone(), request.clone()))
            .collect()
    }

    pub fn services(&self) -> Vec<(String, ServicePayload)> {
        let state = self.state.lock();
        state
            .services
            .iter()
            .map(|(id, payload)| (id.clone(), payload.clone()))
            .collect()
    }

    pub fn containers(&self) -> Vec<(String, ContainerPayload)> {
        let state = self.state.lock();
        state
            .containers
            .iter()
            .map(|(id, payload)| (id.clone(), payload.clone()))
            .collect()
    }

    pub fn metrics(&self) -> Vec<(String, MetricPayload)> {
        let state = self.state.lock();
        state
            .metrics
            .iter()
            .map(|(id, (payload, _))| (id.clone(), payload.clone()))
            .collect()
    }

    /// Identifier of the registered metric with this label and item
    pub fn metric_id(&self, label: &str, item: Option<&str>) -> Option<String> {
        let state = self.state.lock();
        state
            .metrics
            .iter()
            .find(|(_, (payload, _))| payload.label == label && payload.item.as_deref() == item)
            .map(|(id, _)| id.clone())
    }

    pub fn facts(&self) -> BTreeMap<String, String> {
        let state = self.state.lock();
        state
            .facts
            .values()
            .map(|fact| (fact.key.clone(), fact.value.clone()))
            .collect()
    }

    /// Operations called so far, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    /// How many times `op` was called
    pub fn count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

fn apply_threshold(metric: &mut RemoteMetric, threshold: &Threshold) {
    metric.threshold_low_warning = threshold.low_warning;
    metric.threshold_low_critical = threshold.low_critical;
    metric.threshold_high_warning = threshold.high_warning;
    metric.threshold_high_critical = threshold.high_critical;
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn authenticate(&self, agent_id: &str, _password: &str) {
        self.state.lock().authenticated = Some(agent_id.to_string());
    }

    async fn register_agent(
        &self,
        account_id: &str,
        registration_key: &str,
        request: &AgentRegistration,
    ) -> Result<String> {
        let mut state = self.state.lock();
        state.enter("register_agent")?;
        if let Some((account, key)) = &state.registration
            && (account != account_id || key != registration_key)
        {
            return Err(RegistryError::status(401, "register_agent", "invalid key"));
        }
        let id = state.id("agent");
        state.agents.insert(id.clone(), request.clone());
        Ok(id)
    }

    async fn agent(&self, agent_id: &str) -> Result<RemoteAgent> {
        let mut state = self.state.lock();
        state.enter("agent")?;
        Ok(RemoteAgent {
            id: agent_id.to_string(),
            alerting_mode: state.alerting_mode,
        })
    }

    async fn list_services(&self, agent_id: &str) -> Result<Vec<RemoteEntity>> {
        let mut state = self.state.lock();
        state.enter("list_services")?;
        Ok(state
            .services
            .iter()
            .filter(|(_, payload)| payload.agent == agent_id)
            .map(|(id, _)| RemoteEntity { id: id.clone() })
            .collect())
    }

    async fn create_service(&self, payload: &ServicePayload) -> Result<String> {
        let mut state = self.state.lock();
        state.enter("create_service")?;
        let id = state.id("service");
        state.services.insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn update_service(&self, id: &str, payload: &ServicePayload) -> Result<String> {
        let mut state = self.state.lock();
        state.enter("update_service")?;
        match state.services.get_mut(id) {
            Some(existing) => {
                *existing = payload.clone();
                Ok(id.to_string())
            }
            None => Err(not_found("update_service", id)),
        }
    }

    async fn delete_service(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("delete_service")?;
        match state.services.remove(id) {
            Some(_) => Ok(()),
            None => Err(not_found("delete_service", id)),
        }
    }

    async fn list_containers(&self, agent_id: &str) -> Result<Vec<RemoteEntity>> {
        let mut state = self.state.lock();
        state.enter("list_containers")?;
        Ok(state
            .containers
            .iter()
            .filter(|(_, payload)| payload.host == agent_id)
            .map(|(id, _)| RemoteEntity { id: id.clone() })
            .collect())
    }

    async fn create_container(&self, payload: &ContainerPayload) -> Result<String> {
        let mut state = self.state.lock();
        state.enter("create_container")?;
        let id = state.id("container");
        state.containers.insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn update_container(&self, id: &str, payload: &ContainerPayload) -> Result<String> {
        let mut state = self.state.lock();
        state.enter("update_container")?;
        match state.containers.get_mut(id) {
            Some(existing) => {
                *existing = payload.clone();
                Ok(id.to_string())
            }
            None => Err(not_found("update_container", id)),
        }
    }

    async fn delete_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("delete_container")?;
        match state.containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(not_found("delete_container", id)),
        }
    }

    async fn list_metrics(&self, agent_id: &str) -> Result<Vec<RemoteMetric>> {
        let mut state = self.state.lock();
        state.enter("list_metrics")?;
        Ok(state
            .metrics
            .values()
            .filter(|(payload, _)| payload.agent == agent_id)
            .map(|(_, metric)| metric.clone())
            .collect())
    }

    async fn register_metric(&self, payload: &MetricPayload) -> Result<RemoteMetric> {
        let mut state = self.state.lock();
        state.enter("register_metric")?;
        if state.rejected_labels.contains(&payload.label) {
            return Err(RegistryError::status(
                400,
                "register_metric",
                "{\"label\": [\"This label is not allowed.\"]}",
            ));
        }
        if let Some(status_of) = &payload.status_of
            && !state.metrics.contains_key(status_of)
        {
            return Err(RegistryError::status(400, "register_metric", "unknown status_of"));
        }

        let id = state.id("metric");
        let mut metric = RemoteMetric {
            id: id.clone(),
            label: payload.label.clone(),
            item: Some(payload.item.clone().unwrap_or_default()),
            ..Default::default()
        };
        let key = (payload.label.clone(), payload.item.clone());
        if let Some(threshold) = state.thresholds.get(&key) {
            apply_threshold(&mut metric, threshold);
        }
        state.metrics.insert(id, (payload.clone(), metric.clone()));
        Ok(metric)
    }

    async fn delete_metric(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("delete_metric")?;
        match state.metrics.remove(id) {
            Some(_) => Ok(()),
            None => Err(not_found("delete_metric", id)),
        }
    }

    async fn list_facts(&self, agent_id: &str) -> Result<Vec<RemoteFact>> {
        let mut state = self.state.lock();
        state.enter("list_facts")?;
        Ok(state
            .facts
            .iter()
            .filter(|(_, fact)| fact.agent == agent_id)
            .map(|(id, fact)| RemoteFact {
                id: id.clone(),
                key: fact.key.clone(),
                value: fact.value.clone(),
            })
            .collect())
    }

    async fn create_fact(&self, payload: &FactPayload) -> Result<String> {
        let mut state = self.state.lock();
        state.enter("create_fact")?;
        let id = state.id("fact");
        state.facts.insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn delete_fact(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.enter("delete_fact")?;
        match state.facts.remove(id) {
            Some(_) => Ok(()),
            None => Err(not_found("delete_fact", id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calls_require_authentication() {
        let registry = MemoryRegistry::new();
        assert!(matches!(
            registry.list_services("agent-1").await,
            Err(RegistryError::MissingCredentials)
        ));

        registry.authenticate("agent-1", "secret");
        assert!(registry.list_services("agent-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let registry = MemoryRegistry::new();
        registry.authenticate("agent-1", "secret");
        registry.fail_times("list_metrics", 503, 1);

        let err = registry.list_metrics("agent-1").await.unwrap_err();
        assert!(err.is_transient());
        assert!(registry.list_metrics("agent-1").await.is_ok());
        assert_eq!(registry.count("list_metrics"), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let registry = MemoryRegistry::new();
        registry.authenticate("agent-1", "secret");
        assert!(registry.delete_service("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_registration_key_checked() {
        let registry = MemoryRegistry::new().with_registration_key("acc", "key");
        let request = AgentRegistration {
            account: "acc".into(),
            initial_password: "pw".into(),
            display_name: "host".into(),
            fqdn: "host.example.com".into(),
        };
        let err = registry
            .register_agent("acc", "wrong", &request)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(401));
        let id = registry.register_agent("acc", "key", &request).await.unwrap();
        assert_eq!(registry.agents()[0].0, id);
    }
}
