//! MQTT transport settings

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// `[mqtt]` section
///
/// ```toml
/// [mqtt]
/// host = "mqtt.bleemeo.com"
/// port = 8883
/// ssl = true
/// cafile = "/etc/ssl/certs/ca-certificates.crt"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,

    pub port: u16,

    pub ssl: bool,

    /// CA bundle; the platform's default roots are used when unset
    pub cafile: Option<PathBuf>,

    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,

    /// Unacknowledged publishes above which new data is dropped
    pub max_in_flight: usize,

    /// Control messages of this size or larger are ignored
    pub control_payload_limit: usize,

    /// First reconnect delay, doubled on each failure
    #[serde(with = "humantime_serde")]
    pub reconnect_initial: Duration,

    #[serde(with = "humantime_serde")]
    pub reconnect_max: Duration,

    /// How long shutdown waits for outstanding acknowledgments
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtt.bleemeo.com".into(),
            port: 8883,
            ssl: true,
            cafile: None,
            keep_alive: Duration::from_secs(60),
            max_in_flight: 2000,
            control_payload_limit: 64 * 1024,
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            ack_timeout: Duration::from_secs(5),
        }
    }
}
