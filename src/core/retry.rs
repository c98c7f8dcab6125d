//! Retry budget and backoff schedule for delivery attempts.
//!
//! The delay before attempt `n + 1`, after `n` failed attempts, is
//!
//! ```text
//! min(base_delay × 2^(n−1), max_delay) + uniform[0, jitter]
//! ```
//!
//! The exponential part depends only on the attempt number, so jitter never
//! compounds across attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::publisher::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per event, the first one included. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` have failed.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Capped exponential delay after `attempt` failures, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exp);

        if !secs.is_finite() || secs > self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Backoff plus uniform jitter in `[0, jitter]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff(attempt) + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        let ms = self.jitter.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ms))
    }
}
