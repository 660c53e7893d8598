//! Tether synchronization engine
//!
//! Keeps the registry's view of this host consistent with local discovery:
//!
//! - [`bootstrap`]: registration settings and agent registration
//! - [`reconciler`]: services and containers
//! - [`resolver`]: metric registration and thresholds
//! - [`facts`]: host facts
//! - [`synchronizer`]: the loop driving all of the above

pub mod bootstrap;
pub mod context;
pub mod error;
pub mod facts;
pub mod reconciler;
pub mod resolver;
pub mod synchronizer;

#[cfg(test)]
mod testing;

pub use bootstrap::{Bootstrap, RegistrationSettings, wait_for_settings};
pub use context::SyncContext;
pub use error::{Result, SyncError};
pub use facts::FactsSync;
pub use reconciler::{ReconcileReport, Reconciler};
pub use resolver::{ResolveReport, Resolver};
pub use synchronizer::{Synchronizer, TickReport};
