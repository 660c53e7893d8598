//! Tether Configuration
//!
//! TOML configuration with defaults for every field. An empty file is a
//! valid configuration; only the registration settings have to be provided
//! before the agent can register.
//!
//! # Parsing
//!
//! ```
//! use tether_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[mqtt]\nhost = \"localhost\"").unwrap();
//! assert_eq!(config.mqtt.host, "localhost");
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [registry]
//! account_id = "..."
//! registration_key = "..."
//!
//! [agent]
//! state_file = "/var/lib/tether/state.json"
//!
//! [log]
//! level = "info"
//! ```

mod agent;
mod error;
mod logging;
mod mqtt;
mod registry;
mod sync;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use agent::{AgentConfig, MetricConfig};
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use mqtt::MqttConfig;
pub use registry::RegistryConfig;
pub use sync::{QueueConfig, SyncConfig};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,

    pub registry: RegistryConfig,

    pub mqtt: MqttConfig,

    pub sync: SyncConfig,

    pub queue: QueueConfig,

    pub metric: MetricConfig,

    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Load from `path` if given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        validation::validate_config(&config)?;
        Ok(config)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.sync.interval, Duration::from_secs(15));
        assert_eq!(config.queue.capacity, 10_000);
        assert!(config.registry.registration().is_none());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[agent]
state_file = "/tmp/tether/state.json"
fqdn = "web-01.example.com"

[registry]
api_base = "https://api.example.com/"
account_id = "acc-1"
registration_key = "key-1"

[mqtt]
host = "mqtt.example.com"
port = 1883
ssl = false

[sync]
full_interval = "30m"

[queue]
batch_size = 200

[metric]
alerting_metrics = ["agent_status"]

[log]
level = "debug"
"#;
        let config = Config::from_str(toml).unwrap();

        assert_eq!(config.agent.fqdn.as_deref(), Some("web-01.example.com"));
        assert_eq!(config.registry.registration(), Some(("acc-1", "key-1")));
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.sync.full_interval, Duration::from_secs(1800));
        assert_eq!(config.queue.batch_size, 200);
        assert_eq!(config.metric.alerting_metrics, vec!["agent_status"]);
        assert_eq!(config.log.level, LogLevel::Debug);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_str("invalid { toml"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\naccount_id = \"acc\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.registry.account_id.as_deref(), Some("acc"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/tether.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
        assert!(Config::load(None).is_ok());
    }
}
