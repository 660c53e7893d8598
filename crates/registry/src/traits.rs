//! Registry trait definition

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AgentRegistration, ContainerPayload, FactPayload, MetricPayload, RemoteAgent, RemoteEntity,
    RemoteFact, RemoteMetric, ServicePayload,
};

/// Remote registry of agents, services, containers, metrics and facts
///
/// Every call except [`register_agent`](Registry::register_agent) is
/// authenticated with the credentials given to
/// [`authenticate`](Registry::authenticate). List calls return every page.
/// Create and update calls return the remote identifier.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Credentials used by every later call
    fn authenticate(&self, agent_id: &str, password: &str);

    /// Register a new agent with the account's registration key
    async fn register_agent(
        &self,
        account_id: &str,
        registration_key: &str,
        request: &AgentRegistration,
    ) -> Result<String>;

    async fn agent(&self, agent_id: &str) -> Result<RemoteAgent>;

    async fn list_services(&self, agent_id: &str) -> Result<Vec<RemoteEntity>>;

    async fn create_service(&self, payload: &ServicePayload) -> Result<String>;

    async fn update_service(&self, id: &str, payload: &ServicePayload) -> Result<String>;

    async fn delete_service(&self, id: &str) -> Result<()>;

    async fn list_containers(&self, agent_id: &str) -> Result<Vec<RemoteEntity>>;

    async fn create_container(&self, payload: &ContainerPayload) -> Result<String>;

    async fn update_container(&self, id: &str, payload: &ContainerPayload) -> Result<String>;

    async fn delete_container(&self, id: &str) -> Result<()>;

    async fn list_metrics(&self, agent_id: &str) -> Result<Vec<RemoteMetric>>;

    async fn register_metric(&self, payload: &MetricPayload) -> Result<RemoteMetric>;

    async fn delete_metric(&self, id: &str) -> Result<()>;

    async fn list_facts(&self, agent_id: &str) -> Result<Vec<RemoteFact>>;

    async fn create_fact(&self, payload: &FactPayload) -> Result<String>;

    async fn delete_fact(&self, id: &str) -> Result<()>;
}
