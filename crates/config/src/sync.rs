//! Synchronizer and outbound queue settings
//!
//! # Defaults
//!
//! - a tick every 15s, a full reconciliation at least hourly
//! - containers must stay absent for one full interval before remote deletion
//! - metrics blocked on a dependency are dropped after 6h
//! - 10 000 queued points, sent in batches of at most 1000

use serde::Deserialize;
use std::time::Duration;

/// `[sync]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    pub full_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub container_grace: Duration,

    #[serde(with = "humantime_serde")]
    pub pending_ttl: Duration,

    /// First wait for missing registration settings
    #[serde(with = "humantime_serde")]
    pub config_wait_initial: Duration,

    #[serde(with = "humantime_serde")]
    pub config_wait_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            full_interval: Duration::from_secs(3600),
            container_grace: Duration::from_secs(3600),
            pending_ttl: Duration::from_secs(6 * 3600),
            config_wait_initial: Duration::from_secs(10),
            config_wait_max: Duration::from_secs(600),
        }
    }
}

/// `[queue]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Points held before new ones are dropped
    pub capacity: usize,

    /// Points per published message
    pub batch_size: usize,

    /// Wait for the first point of a batch
    #[serde(with = "humantime_serde")]
    pub first_wait: Duration,

    /// Wait for each following point
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Pause when only unresolved points are left
    #[serde(with = "humantime_serde")]
    pub stall_pause: Duration,

    /// Best-effort flush time at shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 1000,
            first_wait: Duration::from_secs(3),
            idle_timeout: Duration::from_millis(300),
            stall_pause: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
