//! Tether core: data model and shared state of the synchronization engine
//!
//! - [`IdentityCache`]: persistent local identity to remote identifier mapping
//! - [`SyncSignals`]: wake-up flags consumed by the synchronizer
//! - [`Discovery`] / [`SyncObserver`]: the engine's boundary with collaborators
//! - [`MetricFilter`]: alerting-mode filtering

pub mod backoff;
pub mod cache;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod identity;
pub mod point;
pub mod registration;
pub mod signal;
pub mod state;

pub use backoff::Backoff;
pub use cache::{AgentCredentials, CacheStats, IdentityCache, LOGIN_DOMAIN, login_name};
pub use discovery::{DeletedEntity, Discovery, NoopObserver, SharedDiscovery, SyncObserver};
pub use error::{CoreError, Result};
pub use filter::MetricFilter;
pub use identity::{MetricIdentity, MetricInfo, ServiceIdentity};
pub use point::{AGENT_STATUS, MetricPoint, now_secs};
pub use registration::{
    ContainerRegistration, MetricRegistration, ServiceDescriptor, ServiceRegistration, Threshold,
    ThresholdKey, ThresholdMap, inspect_hash,
};
pub use signal::{PendingSignals, SyncSignals};
pub use state::{Snapshot, StateFile};
