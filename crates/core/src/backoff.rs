//! Capped exponential backoff
//!
//! Used by the bootstrap configuration wait and by the transport reconnect loop.

use std::time::Duration;

/// Exponential backoff: the delay doubles after each failure up to `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns twice as much (capped)
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay after a success
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
