//! Alerting-mode metric filter
//!
//! In alerting mode the platform only wants metrics that carry a status,
//! plus an explicit whitelist. Outside alerting mode everything is sent.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Decides whether a metric is sent to the platform
#[derive(Debug, Default)]
pub struct MetricFilter {
    alerting_mode: AtomicBool,
    whitelist: HashSet<String>,
}

impl MetricFilter {
    pub fn new(whitelist: impl IntoIterator<Item = String>) -> Self {
        Self {
            alerting_mode: AtomicBool::new(false),
            whitelist: whitelist.into_iter().collect(),
        }
    }

    pub fn alerting_mode(&self) -> bool {
        self.alerting_mode.load(Ordering::Relaxed)
    }

    /// Update the mode; returns true if it changed
    pub fn set_alerting_mode(&self, enabled: bool) -> bool {
        self.alerting_mode.swap(enabled, Ordering::Relaxed) != enabled
    }

    pub fn should_send(&self, label: &str, has_status: bool) -> bool {
        !self.alerting_mode() || has_status || self.whitelist.contains(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everything_sent_outside_alerting_mode() {
        let filter = MetricFilter::new(Vec::new());
        assert!(filter.should_send("cpu_used", false));
    }

    #[test]
    fn test_alerting_mode_keeps_status_and_whitelist() {
        let filter = MetricFilter::new(vec!["mem_used_perc".to_string()]);
        assert!(filter.set_alerting_mode(true));
        assert!(!filter.set_alerting_mode(true));

        assert!(!filter.should_send("cpu_used", false));
        assert!(filter.should_send("cpu_used", true));
        assert!(filter.should_send("mem_used_perc", false));
    }
}
