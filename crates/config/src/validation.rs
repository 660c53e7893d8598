//! Configuration validation
//!
//! Rejects values the agent cannot run with:
//! - empty MQTT host, zero port
//! - API base that is not an http(s) URL
//! - zero queue capacity, batch size or in-flight ceiling
//! - zero synchronizer interval

use crate::Config;
use crate::error::{ConfigError, Result};

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_registry(config)?;
    validate_mqtt(config)?;
    validate_sync(config)?;
    Ok(())
}

fn validate_registry(config: &Config) -> Result<()> {
    let base = config.registry.api_base.trim();
    if base.is_empty() {
        return Err(ConfigError::missing_field("registry", "api_base"));
    }

    let Some((scheme, rest)) = base.split_once("://") else {
        return Err(ConfigError::invalid_value(
            "registry",
            "api_base",
            format!("'{}' is not a URL", base),
        ));
    };
    if !matches!(scheme, "http" | "https") || rest.is_empty() {
        return Err(ConfigError::invalid_value(
            "registry",
            "api_base",
            format!("'{}' must be an http or https URL", base),
        ));
    }

    if config.registry.request_timeout.is_zero() {
        return Err(ConfigError::invalid_value(
            "registry",
            "request_timeout",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_mqtt(config: &Config) -> Result<()> {
    let mqtt = &config.mqtt;
    if mqtt.host.trim().is_empty() {
        return Err(ConfigError::missing_field("mqtt", "host"));
    }
    if mqtt.port == 0 {
        return Err(ConfigError::invalid_value("mqtt", "port", "must be greater than 0"));
    }
    if mqtt.max_in_flight == 0 {
        return Err(ConfigError::invalid_value(
            "mqtt",
            "max_in_flight",
            "must be greater than 0",
        ));
    }
    if mqtt.control_payload_limit == 0 {
        return Err(ConfigError::invalid_value(
            "mqtt",
            "control_payload_limit",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_sync(config: &Config) -> Result<()> {
    if config.sync.interval.is_zero() {
        return Err(ConfigError::invalid_value("sync", "interval", "must be greater than 0"));
    }
    if config.queue.capacity == 0 {
        return Err(ConfigError::invalid_value("queue", "capacity", "must be greater than 0"));
    }
    if config.queue.batch_size == 0 {
        return Err(ConfigError::invalid_value(
            "queue",
            "batch_size",
            "must be greater than 0",
        ));
    }
    Ok(())
}
