// Backoff for segment transfers that timed out.

use rand::RngExt;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt; `None` retries
    /// until the session stops.
    pub max_retries: Option<u32>,
    /// Wait before the first retry; doubled for every further one.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Shorten each wait by a random share of up to 25%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failures (0-indexed).
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt < max)
    }

    /// Wait before retry `attempt` (0-indexed): `base_delay` doubled per
    /// attempt up to `max_delay`. Jitter only shortens it, by up to a quarter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(1 << attempt.min(31))
            .min(self.max_delay);
        if self.jitter && !delay.is_zero() {
            delay.mul_f64(rand::rng().random_range(0.75..=1.0))
        } else {
            delay
        }
    }
}
