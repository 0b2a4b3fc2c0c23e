//! Reconnect schedule for a lost link

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff for reconnecting a lost link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Delay before the 1-based `attempt`, or `None` once attempts are used up
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }

    /// Full delay schedule
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).filter_map(move |attempt| self.delay_for(attempt))
    }
}
