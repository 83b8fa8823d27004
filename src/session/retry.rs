//! Reconnect retry policy

use crate::config::duration_ms;
use node_console_shared::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between connect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `initial_delay * n` before the (n+1)-th attempt
    Linear,
    /// `initial_delay * 2^(n-1)` before the (n+1)-th attempt
    #[default]
    Exponential,
}

/// Bounded retry configuration for establishing a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total connect attempts per connection cycle (at least one is made)
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "duration_ms", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::CONNECT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(defaults::RECONNECT_DELAY_MS),
            max_delay: Duration::from_millis(defaults::MAX_RECONNECT_DELAY_MS),
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `failed_attempt` (1-based)
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.initial_delay.saturating_mul(n),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(n - 1).unwrap_or(u32::MAX);
                self.initial_delay.saturating_mul(factor)
            }
        };
        std::cmp::min(delay, self.max_delay)
    }
}
