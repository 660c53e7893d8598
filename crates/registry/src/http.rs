//! reqwest-backed [`Registry`]
//!
//! Every call is a single attempt. Retrying is the synchronizer's job: a
//! failed call is simply repeated on a later tick.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_core::login_name;
use tracing::{debug, trace};

use crate::error::{RegistryError, Result};
use crate::models::{
    AgentRegistration, ContainerPayload, FactPayload, MetricPayload, Page, RemoteAgent,
    RemoteEntity, RemoteFact, RemoteMetric, ServicePayload,
};
use crate::traits::Registry;

/// Page size requested from list endpoints
const PAGE_SIZE: &str = "100";

/// Upper bound on pages followed by one list call
const MAX_PAGES: usize = 1000;

/// Maximum number of body bytes kept in error messages
const ERROR_BODY_LIMIT: usize = 512;

/// HTTP client for the registry API
pub struct HttpRegistry {
    client: reqwest::Client,
    base: String,
    credentials: RwLock<Option<(String, String)>>,
}

impl HttpRegistry {
    /// Create a client for the API rooted at `api_base`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built (TLS backend failure)
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Init(e.to_string()))?;

        Ok(Self {
            client,
            base: api_base.trim_end_matches('/').to_string(),
            credentials: RwLock::new(None),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/v1/{}/", self.base, collection)
    }

    fn item_url(&self, collection: &str, id: &str) -> String {
        format!("{}/v1/{}/{}/", self.base, collection, id)
    }

    /// Authenticated request with the headers the API expects
    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let credentials = self.credentials.read();
        let (username, password) = credentials
            .as_ref()
            .ok_or(RegistryError::MissingCredentials)?;
        Ok(self
            .client
            .request(method, url)
            .basic_auth(username, Some(password))
            .header("X-Requested-With", "XMLHttpRequest"))
    }

    /// Fail unless the response has one of the `expected` statuses
    async fn expect(
        response: reqwest::Response,
        expected: &[StatusCode],
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if expected.contains(&status) {
            return Ok(response);
        }

        let url = response.url().to_string();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > ERROR_BODY_LIMIT {
            let mut end = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(RegistryError::status(status.as_u16(), url, body))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let url = response.url().to_string();
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| RegistryError::Decode {
            url,
            message: e.to_string(),
        })
    }

    /// Fetch every page of a list endpoint filtered on `agent_id`
    async fn list<T: DeserializeOwned>(&self, collection: &str, agent_id: &str) -> Result<Vec<T>> {
        let first = self
            .request(Method::GET, &self.collection_url(collection))?
            .query(&[("agent", agent_id), ("page_size", PAGE_SIZE)]);
        let response = Self::expect(first.send().await?, &[StatusCode::OK]).await?;
        let (mut items, mut next) = Self::decode::<Page<T>>(response).await?.into_parts();

        let mut visited = HashSet::new();
        while let Some(url) = next {
            if visited.len() + 1 >= MAX_PAGES || !visited.insert(url.clone()) {
                return Err(RegistryError::Pagination { url });
            }
            let response = self.request(Method::GET, &url)?.send().await?;
            let response = Self::expect(response, &[StatusCode::OK]).await?;
            let (page, following) = Self::decode::<Page<T>>(response).await?.into_parts();
            items.extend(page);
            next = following;
        }

        let pages = visited.len() + 1;
        trace!(collection, pages, count = items.len(), "listed registry entities");
        Ok(items)
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: &B,
        expected: &[StatusCode],
    ) -> Result<T> {
        let response = self.request(method, url)?.json(body).send().await?;
        let response = Self::expect(response, expected).await?;
        Self::decode(response).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.item_url(collection, id);
        let response = self.request(Method::DELETE, &url)?.send().await?;
        Self::expect(response, &[StatusCode::NO_CONTENT, StatusCode::OK]).await?;
        debug!(collection, id, "deleted registry entity");
        Ok(())
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    fn authenticate(&self, agent_id: &str, password: &str) {
        *self.credentials.write() = Some((login_name(agent_id), password.to_string()));
    }

    async fn register_agent(
        &self,
        account_id: &str,
        registration_key: &str,
        request: &AgentRegistration,
    ) -> Result<String> {
        let url = self.collection_url("agent");
        let response = self
            .client
            .post(&url)
            .basic_auth(login_name(account_id), Some(registration_key))
            .header("X-Requested-With", "XMLHttpRequest")
            .json(request)
            .send()
            .await?;
        let response = Self::expect(response, &[StatusCode::CREATED]).await?;
        let agent: RemoteEntity = Self::decode(response).await?;
        Ok(agent.id)
    }

    async fn agent(&self, agent_id: &str) -> Result<RemoteAgent> {
        let response = self
            .request(Method::GET, &self.item_url("agent", agent_id))?
            .send()
            .await?;
        let response = Self::expect(response, &[StatusCode::OK]).await?;
        Self::decode(response).await
    }

    async fn list_services(&self, agent_id: &str) -> Result<Vec<RemoteEntity>> {
        self.list("service", agent_id).await
    }

    async fn create_service(&self, payload: &ServicePayload) -> Result<String> {
        let url = self.collection_url("service");
        let entity: RemoteEntity = self
            .send_json(Method::POST, &url, payload, &[StatusCode::CREATED])
            .await?;
        Ok(entity.id)
    }

    async fn update_service(&self, id: &str, payload: &ServicePayload) -> Result<String> {
        let url = self.item_url("service", id);
        let entity: RemoteEntity = self
            .send_json(Method::PUT, &url, payload, &[StatusCode::OK])
            .await?;
        Ok(entity.id)
    }

    async fn delete_service(&self, id: &str) -> Result<()> {
        self.delete("service", id).await
    }

    async fn list_containers(&self, agent_id: &str) -> Result<Vec<RemoteEntity>> {
        self.list("container", agent_id).await
    }

    async fn create_container(&self, payload: &ContainerPayload) -> Result<String> {
        let url = self.collection_url("container");
        let entity: RemoteEntity = self
            .send_json(
                Method::POST,
                &url,
                payload,
                &[StatusCode::CREATED, StatusCode::OK],
            )
            .await?;
        Ok(entity.id)
    }

    async fn update_container(&self, id: &str, payload: &ContainerPayload) -> Result<String> {
        let url = self.item_url("container", id);
        let entity: RemoteEntity = self
            .send_json(
                Method::PUT,
                &url,
                payload,
                &[StatusCode::OK, StatusCode::CREATED],
            )
            .await?;
        Ok(entity.id)
    }

    async fn delete_container(&self, id: &str) -> Result<()> {
        self.delete("container", id).await
    }

    async fn list_metrics(&self, agent_id: &str) -> Result<Vec<RemoteMetric>> {
        self.list("metric", agent_id).await
    }

    async fn register_metric(&self, payload: &MetricPayload) -> Result<RemoteMetric> {
        let url = self.collection_url("metric");
        self.send_json(Method::POST, &url, payload, &[StatusCode::CREATED])
            .await
    }

    async fn delete_metric(&self, id: &str) -> Result<()> {
        self.delete("metric", id).await
    }

    async fn list_facts(&self, agent_id: &str) -> Result<Vec<RemoteFact>> {
        self.list("agentfact", agent_id).await
    }

    async fn create_fact(&self, payload: &FactPayload) -> Result<String> {
        let url = self.collection_url("agentfact");
        let entity: RemoteEntity = self
            .send_json(Method::POST, &url, payload, &[StatusCode::CREATED])
            .await?;
        Ok(entity.id)
    }

    async fn delete_fact(&self, id: &str) -> Result<()> {
        self.delete("agentfact", id).await
    }
}
