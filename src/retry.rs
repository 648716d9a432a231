//! Backoff for owner-requested retries
//!
//! Neither the signaling client nor a peer session ever retries on its own.
//! An owner that wants to try again asks this policy how long to wait and
//! whether it may try at all.

use crate::config::RETRY_DELAY;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter
    pub jitter_enabled: bool,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_initial: RETRY_DELAY,
            backoff_max: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl ReconnectionPolicy {
    /// Fixed delay, unlimited attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_retries: u32::MAX,
            backoff_initial: delay,
            backoff_max: delay,
            backoff_multiplier: 1.0,
            jitter_enabled: false,
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_ms = (self.backoff_initial.as_millis() as f64)
            * self.backoff_multiplier.powi(exponent);
        let base_ms = base_ms.min(self.backoff_max.as_millis() as f64);

        let final_ms = if self.jitter_enabled && base_ms > 0.0 {
            base_ms + rand::rng().random_range(0.0..=base_ms * 0.25)
        } else {
            base_ms
        };
        Duration::from_millis(final_ms as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
