//! Agent registration and session setup
//!
//! Startup blocks in [`wait_for_settings`] until the account id and
//! registration key are configured. Registration itself is attempted by
//! [`Bootstrap::ensure_registered`] at startup and again on every
//! synchronizer tick until it succeeds.

use rand::Rng;
use rand::distr::Alphanumeric;
use tether_core::Backoff;
use tether_registry::AgentRegistration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::SyncContext;
use crate::error::Result;

/// Length of the generated agent password
const PASSWORD_LEN: usize = 32;

/// Settings needed to register a new agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSettings {
    pub account_id: String,
    pub registration_key: String,
}

/// Reload settings with `load` until they are present
///
/// Sleeps between attempts with `backoff`. Returns `None` if `cancel` fires
/// first.
pub async fn wait_for_settings<F>(
    mut load: F,
    mut backoff: Backoff,
    cancel: &CancellationToken,
) -> Option<RegistrationSettings>
where
    F: FnMut() -> Option<RegistrationSettings>,
{
    loop {
        if let Some(settings) = load() {
            return Some(settings);
        }

        let delay = backoff.next_delay();
        info!(
            retry_in = ?delay,
            "account_id and registration_key are not configured, waiting"
        );
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Registers the agent and authenticates the registry client
pub struct Bootstrap {
    settings: RegistrationSettings,
    fqdn: Option<String>,
}

impl Bootstrap {
    /// `fqdn` overrides the `fqdn` fact as the registered name
    pub fn new(settings: RegistrationSettings, fqdn: Option<String>) -> Self {
        Self { settings, fqdn }
    }

    pub fn account_id(&self) -> &str {
        &self.settings.account_id
    }

    /// Name to register under, if known yet
    fn display_name(&self, ctx: &SyncContext) -> Option<String> {
        self.fqdn
            .clone()
            .or_else(|| ctx.discovery.facts().get("fqdn").cloned())
            .filter(|name| !name.is_empty())
    }

    /// Make sure the agent has an identifier and the registry is authenticated
    ///
    /// Returns the agent id, or `None` when registration has to wait (no
    /// FQDN yet). The generated password is persisted before the
    /// registration call so a crash cannot orphan a registered agent.
    pub async fn ensure_registered(&self, ctx: &SyncContext) -> Result<Option<String>> {
        let password = ctx.cache.ensure_password(generate_password)?;

        if let Some(agent_id) = ctx.cache.agent_id() {
            ctx.registry.authenticate(&agent_id, &password);
            return Ok(Some(agent_id));
        }

        let Some(name) = self.display_name(ctx) else {
            debug!("registration delayed, fqdn not available");
            return Ok(None);
        };

        let request = AgentRegistration {
            account: self.settings.account_id.clone(),
            initial_password: password.clone(),
            display_name: name.clone(),
            fqdn: name,
        };
        let agent_id = ctx
            .registry
            .register_agent(
                &self.settings.account_id,
                &self.settings.registration_key,
                &request,
            )
            .await?;

        ctx.cache.set_agent_id(&agent_id)?;
        ctx.registry.authenticate(&agent_id, &password);
        info!(agent_id = %agent_id, "agent registered");
        Ok(Some(agent_id))
    }
}
