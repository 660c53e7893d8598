//! Identity cache
//!
//! Maps local identities to remote identifiers for metrics, services and
//! containers, plus the thresholds and agent credentials returned by the
//! registry. Every mutation is written to the state file before it returns.
//!
//! # Locking
//!
//! A single mutex guards the maps. It is held for the in-memory update and
//! the state file write, never across a registry call: callers take a
//! snapshot (`pending_metrics`, `services`, ...), release the lock, talk to
//! the registry, then record the outcome.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identity::{MetricIdentity, MetricInfo, ServiceIdentity};
use crate::registration::{
    ContainerRegistration, MetricRegistration, ServiceRegistration, Threshold, ThresholdKey,
    ThresholdMap,
};
use crate::state::{MetricEntry, ServiceEntry, Snapshot, StateFile, ThresholdEntry};

/// Domain appended to account and agent identifiers to form login names
pub const LOGIN_DOMAIN: &str = "bleemeo.com";

/// Login name for the registry and the broker: `<id>@bleemeo.com`
pub fn login_name(id: &str) -> String {
    format!("{}@{}", id, LOGIN_DOMAIN)
}

/// Agent identifier and secret used to authenticate against the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCredentials {
    pub agent_id: Option<String>,
    pub password: Option<String>,
}

impl AgentCredentials {
    /// Both halves are known
    pub fn is_complete(&self) -> bool {
        self.agent_id.is_some() && self.password.is_some()
    }

    /// Login name and password, when both are known
    pub fn login(&self) -> Option<(String, String)> {
        match (&self.agent_id, &self.password) {
            (Some(id), Some(password)) => Some((login_name(id), password.clone())),
            _ => None,
        }
    }
}

/// Entry counts, for health logging and the `state` command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub unresolved: usize,
    pub resolved: usize,
    pub deleted: usize,
    pub services: usize,
    pub containers: usize,
    pub thresholds: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    credentials: AgentCredentials,
    metrics: HashMap<MetricIdentity, MetricRegistration>,
    infos: HashMap<MetricIdentity, MetricInfo>,
    services: HashMap<ServiceIdentity, ServiceRegistration>,
    containers: HashMap<String, ContainerRegistration>,
    thresholds: ThresholdMap,
}

impl CacheInner {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            credentials: AgentCredentials {
                agent_id: snapshot.agent_id,
                password: snapshot.password,
            },
            metrics: snapshot
                .metrics
                .into_iter()
                .map(|e| (e.identity, e.registration))
                .collect(),
            infos: HashMap::new(),
            services: snapshot
                .services
                .into_iter()
                .map(|e| (e.identity, e.registration))
                .collect(),
            containers: snapshot.containers.into_iter().collect(),
            thresholds: snapshot
                .thresholds
                .into_iter()
                .map(|e| (e.key, e.threshold))
                .collect(),
        }
    }

    fn snapshot(&self) -> Snapshot {
        let mut metrics: Vec<MetricEntry> = self
            .metrics
            .iter()
            .map(|(identity, registration)| MetricEntry {
                identity: identity.clone(),
                registration: registration.clone(),
            })
            .collect();
        metrics.sort_by(|a, b| a.identity.cmp(&b.identity));

        let mut services: Vec<ServiceEntry> = self
            .services
            .iter()
            .map(|(identity, registration)| ServiceEntry {
                identity: identity.clone(),
                registration: registration.clone(),
            })
            .collect();
        services.sort_by(|a, b| a.identity.cmp(&b.identity));

        let mut thresholds: Vec<ThresholdEntry> = self
            .thresholds
            .iter()
            .map(|(key, threshold)| ThresholdEntry {
                key: key.clone(),
                threshold: *threshold,
            })
            .collect();
        thresholds.sort_by(|a, b| a.key.cmp(&b.key));

        Snapshot {
            agent_id: self.credentials.agent_id.clone(),
            password: self.credentials.password.clone(),
            metrics,
            services,
            containers: self
                .containers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            thresholds,
        }
    }
}

/// Thread-safe, persistent identity cache
#[derive(Debug)]
pub struct IdentityCache {
    inner: Mutex<CacheInner>,
    file: Option<StateFile>,
}

impl IdentityCache {
    /// Open the cache backed by the state file at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let file = StateFile::new(path);
        let snapshot = file.load()?;
        debug!(
            path = %file.path().display(),
            metrics = snapshot.metrics.len(),
            services = snapshot.services.len(),
            containers = snapshot.containers.len(),
            "identity cache loaded"
        );
        Ok(Self {
            inner: Mutex::new(CacheInner::from_snapshot(snapshot)),
            file: Some(file),
        })
    }

    /// Cache that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            file: None,
        }
    }

    fn persist(&self, inner: &CacheInner) -> Result<()> {
        match &self.file {
            Some(file) => file.save(&inner.snapshot()),
            None => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // Metrics
    // -------------------------------------------------------------------------

    /// Registration state of a metric; unknown identities read as unresolved
    pub fn lookup(&self, identity: &MetricIdentity) -> MetricRegistration {
        self.get(identity).unwrap_or(MetricRegistration::Unresolved)
    }

    /// Registration state, `None` when the identity is not in the cache
    pub fn get(&self, identity: &MetricIdentity) -> Option<MetricRegistration> {
        self.inner.lock().metrics.get(identity).cloned()
    }

    /// Record the dependency metadata of a metric
    ///
    /// First write wins: info already recorded since start is kept. An
    /// unknown identity is inserted as unresolved. Returns the current
    /// registration state.
    pub fn record_info(
        &self,
        identity: &MetricIdentity,
        info: MetricInfo,
    ) -> Result<MetricRegistration> {
        let mut inner = self.inner.lock();
        inner.infos.entry(identity.clone()).or_insert(info);

        if let Some(registration) = inner.metrics.get(identity) {
            return Ok(registration.clone());
        }

        inner
            .metrics
            .insert(identity.clone(), MetricRegistration::Unresolved);
        self.persist(&inner)?;
        Ok(MetricRegistration::Unresolved)
    }

    /// Dependency metadata recorded since start
    pub fn info(&self, identity: &MetricIdentity) -> Option<MetricInfo> {
        self.inner.lock().infos.get(identity).cloned()
    }

    /// Store the remote identifier of a metric
    ///
    /// Resolving an already resolved metric replaces the identifier (a
    /// repeated registration is an update). Tombstoned or purged identities
    /// are left alone. Returns whether the cache changed.
    pub fn mark_resolved(&self, identity: &MetricIdentity, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        let mut inner = self.inner.lock();

        let Some(registration) = inner.metrics.get_mut(identity) else {
            return Ok(false);
        };

        match registration {
            MetricRegistration::Unresolved => {
                *registration = MetricRegistration::Resolved(id);
            }
            MetricRegistration::Resolved(current) => {
                if *current == id {
                    return Ok(false);
                }
                debug!(
                    metric = %identity,
                    previous = %current,
                    id = %id,
                    "metric registered again, keeping latest identifier"
                );
                *current = id;
            }
            MetricRegistration::Deleted => return Ok(false),
        }

        self.persist(&inner)?;
        Ok(true)
    }

    /// Tombstone a metric; returns whether the cache changed
    pub fn mark_deleted(&self, identity: &MetricIdentity) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.metrics.get_mut(identity) {
            Some(MetricRegistration::Deleted) | None => Ok(false),
            Some(registration) => {
                *registration = MetricRegistration::Deleted;
                self.persist(&inner)?;
                Ok(true)
            }
        }
    }

    /// Remove metrics and their info entirely; returns how many were removed
    pub fn purge_stale(&self, identities: &[MetricIdentity]) -> Result<usize> {
        if identities.is_empty() {
            return Ok(0);
        }

        let mut inner = self.inner.lock();
        let mut removed = 0;
        for identity in identities {
            inner.infos.remove(identity);
            if inner.metrics.remove(identity).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            self.persist(&inner)?;
        }
        Ok(removed)
    }

    /// Unresolved metrics with their info, if any was recorded since start
    pub fn pending_metrics(&self) -> Vec<(MetricIdentity, Option<MetricInfo>)> {
        let inner = self.inner.lock();
        let mut pending: Vec<_> = inner
            .metrics
            .iter()
            .filter(|(_, registration)| **registration == MetricRegistration::Unresolved)
            .map(|(identity, _)| (identity.clone(), inner.infos.get(identity).cloned()))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending
    }

    /// Resolved metrics and their remote identifiers
    pub fn resolved_metrics(&self) -> Vec<(MetricIdentity, String)> {
        let inner = self.inner.lock();
        let mut resolved: Vec<_> = inner
            .metrics
            .iter()
            .filter_map(|(identity, registration)| {
                registration.id().map(|id| (identity.clone(), id.to_string()))
            })
            .collect();
        resolved.sort_by(|a, b| a.0.cmp(&b.0));
        resolved
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    pub fn service(&self, identity: &ServiceIdentity) -> Option<ServiceRegistration> {
        self.inner.lock().services.get(identity).cloned()
    }

    pub fn services(&self) -> Vec<(ServiceIdentity, ServiceRegistration)> {
        let inner = self.inner.lock();
        let mut services: Vec<_> = inner
            .services
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        services.sort_by(|a, b| a.0.cmp(&b.0));
        services
    }

    pub fn set_service(
        &self,
        identity: ServiceIdentity,
        registration: ServiceRegistration,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.services.insert(identity, registration);
        self.persist(&inner)
    }

    pub fn remove_services(&self, identities: &[ServiceIdentity]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let removed = identities
            .iter()
            .filter(|identity| inner.services.remove(*identity).is_some())
            .count();
        if removed > 0 {
            self.persist(&inner)?;
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Containers
    // -------------------------------------------------------------------------

    pub fn container(&self, name: &str) -> Option<ContainerRegistration> {
        self.inner.lock().containers.get(name).cloned()
    }

    pub fn containers(&self) -> Vec<(String, ContainerRegistration)> {
        let inner = self.inner.lock();
        let mut containers: Vec<_> = inner
            .containers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        containers.sort_by(|a, b| a.0.cmp(&b.0));
        containers
    }

    pub fn set_container(
        &self,
        name: impl Into<String>,
        registration: ContainerRegistration,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.containers.insert(name.into(), registration);
        self.persist(&inner)
    }

    pub fn remove_containers(&self, names: &[String]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let removed = names
            .iter()
            .filter(|name| inner.containers.remove(name.as_str()).is_some())
            .count();
        if removed > 0 {
            self.persist(&inner)?;
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Thresholds
    // -------------------------------------------------------------------------

    pub fn thresholds(&self) -> ThresholdMap {
        self.inner.lock().thresholds.clone()
    }

    pub fn set_threshold(&self, key: ThresholdKey, threshold: Threshold) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.thresholds.get(&key) == Some(&threshold) {
            return Ok(());
        }
        inner.thresholds.insert(key, threshold);
        self.persist(&inner)
    }

    pub fn replace_thresholds(&self, thresholds: ThresholdMap) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.thresholds = thresholds;
        self.persist(&inner)
    }

    // -------------------------------------------------------------------------
    // Credentials
    // -------------------------------------------------------------------------

    pub fn credentials(&self) -> AgentCredentials {
        self.inner.lock().credentials.clone()
    }

    pub fn agent_id(&self) -> Option<String> {
        self.inner.lock().credentials.agent_id.clone()
    }

    pub fn set_agent_id(&self, agent_id: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.credentials.agent_id = Some(agent_id.into());
        self.persist(&inner)
    }

    /// Store the password unless one already exists; returns the stored password
    pub fn ensure_password(&self, generate: impl FnOnce() -> String) -> Result<String> {
        let mut inner = self.inner.lock();
        if let Some(password) = &inner.credentials.password {
            return Ok(password.clone());
        }
        let password = generate();
        inner.credentials.password = Some(password.clone());
        if let Err(e) = self.persist(&inner) {
            warn!(error = %e, "failed to persist generated password");
            inner.credentials.password = None;
            return Err(e);
        }
        Ok(password)
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let mut stats = CacheStats {
            services: inner.services.len(),
            containers: inner.containers.len(),
            thresholds: inner.thresholds.len(),
            ..Default::default()
        };
        for registration in inner.metrics.values() {
            match registration {
                MetricRegistration::Unresolved => stats.unresolved += 1,
                MetricRegistration::Resolved(_) => stats.resolved += 1,
                MetricRegistration::Deleted => stats.deleted += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
