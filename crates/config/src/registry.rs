//! Registry API settings

use serde::Deserialize;
use std::time::Duration;

/// `[registry]` section
///
/// `account_id` and `registration_key` are only needed until the agent is
/// registered; the agent waits for them when they are missing.
///
/// ```toml
/// [registry]
/// api_base = "https://api.bleemeo.com/"
/// account_id = "c3d1..."
/// registration_key = "..."
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub api_base: String,

    pub account_id: Option<String>,

    pub registration_key: Option<String>,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.bleemeo.com/".into(),
            account_id: None,
            registration_key: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Account id and registration key, when both are set and non-empty
    pub fn registration(&self) -> Option<(&str, &str)> {
        let account = self.account_id.as_deref().filter(|s| !s.is_empty())?;
        let key = self.registration_key.as_deref().filter(|s| !s.is_empty())?;
        Some((account, key))
    }
}
