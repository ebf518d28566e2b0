//! Bounded exponential backoff with jitter for store reconnection.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    /// Reconnect budget for one outage; exhausting it is reported upward.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 200,
            max_ms: 10_000,
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    /// Delay before the given attempt (1-based), capped and jittered.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }
        let exponential = 2u64.saturating_pow(attempt - 1);
        let capped = self.base_ms.saturating_mul(exponential).min(self.max_ms);

        // up to 10% jitter so parallel reconnects spread out
        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}
