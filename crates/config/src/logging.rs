//! Logging configuration
//!
//! Controls where the agent writes its own logs and how verbose they are.

use serde::Deserialize;

/// Log level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines (default)
    #[default]
    Console,
    /// One JSON object per line
    Json,
}

/// Log destination
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Append to the file at this path
    #[serde(untagged)]
    File(String),
}

/// `[log]` section
///
/// ```toml
/// [log]
/// level = "info"
/// format = "console"
/// output = "/var/log/tether/agent.log"
/// quiet = ["rumqttc"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,

    pub format: LogFormat,

    pub output: LogOutput,

    /// Crates whose logs are capped at `warn` (the MQTT client is chatty at debug)
    pub quiet: Vec<String>,
}

impl LogConfig {
    /// EnvFilter directives for `level`, with the quiet crates capped at warn
    pub fn directives(&self, level: &str) -> String {
        let mut directives = vec![level.to_string()];
        directives.extend(self.quiet.iter().map(|target| format!("{}=warn", target)));
        directives.join(",")
    }
}
