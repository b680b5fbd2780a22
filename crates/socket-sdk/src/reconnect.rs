//! Reconnect policy with capped exponential back-off.

use std::time::Duration;

use moe_domain::config::SocketConfig;

/// Controls how long the manager waits before each reconnect attempt.
///
/// The delay starts at `min_delay`, doubles after every attempt that does
/// not reach an open transport, and never exceeds `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    /// Delay before the first attempt, and the value restored on success.
    pub min_delay: Duration,
    /// Cap.
    pub max_delay: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(4000),
        }
    }
}

impl ReconnectBackoff {
    pub fn from_config(cfg: &SocketConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(cfg.min_retry_ms),
            max_delay: Duration::from_millis(cfg.max_retry_ms),
        }
    }

    /// Delay to use after `current` has been spent.
    pub fn next(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }

    pub fn reset(&self) -> Duration {
        self.min_delay
    }
}
