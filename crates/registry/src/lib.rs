//! Tether registry client
//!
//! Typed access to the platform's REST registry: agents, services,
//! containers, metrics and facts.
//!
//! - [`Registry`]: the trait the synchronizer talks to
//! - [`HttpRegistry`]: reqwest implementation
//! - `MemoryRegistry`: in-memory implementation for tests, behind the
//!   `testing` feature

mod error;
mod http;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod models;
mod traits;

pub use error::{RegistryError, Result};
pub use http::HttpRegistry;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryRegistry;
pub use models::{
    AgentRegistration, ContainerPayload, FactPayload, MetricPayload, Page, RemoteAgent,
    RemoteEntity, RemoteFact, RemoteMetric, ServicePayload,
};
pub use traits::Registry;
