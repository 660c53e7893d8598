//! Agent-wide settings: local files and health reporting

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// `[agent]` section
///
/// ```toml
/// [agent]
/// state_file = "/var/lib/tether/state.json"
/// upgrade_file = "/var/lib/tether/upgrade"
/// health_interval = "60s"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Persistent identity cache and credentials
    pub state_file: PathBuf,

    /// When this file exists at shutdown the disconnect message is not sent,
    /// so the platform does not report the agent as stopped during an upgrade
    pub upgrade_file: PathBuf,

    /// Overrides the host FQDN sent at registration
    pub fqdn: Option<String>,

    /// Period of the health log line and the `agent_status` point
    #[serde(with = "humantime_serde")]
    pub health_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/var/lib/tether/state.json"),
            upgrade_file: PathBuf::from("/var/lib/tether/upgrade"),
            fqdn: None,
            health_interval: Duration::from_secs(60),
        }
    }
}

/// `[metric]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Labels still sent in alerting mode even without a status
    pub alerting_metrics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.state_file, PathBuf::from("/var/lib/tether/state.json"));
        assert_eq!(config.health_interval, Duration::from_secs(60));
        assert!(config.fqdn.is_none());
    }

    #[test]
    fn test_partial() {
        let toml = r#"
state_file = "/tmp/state.json"
health_interval = "5m"
"#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.state_file, PathBuf::from("/tmp/state.json"));
        assert_eq!(config.health_interval, Duration::from_secs(300));
        assert_eq!(config.upgrade_file, PathBuf::from("/var/lib/tether/upgrade"));
    }

    #[test]
    fn test_alerting_metrics() {
        let config: MetricConfig =
            toml::from_str(r#"alerting_metrics = ["cpu_used", "mem_used_perc"]"#).unwrap();
        assert_eq!(config.alerting_metrics.len(), 2);
    }
}
