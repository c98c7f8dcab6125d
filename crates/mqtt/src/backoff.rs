//! Exponential backoff for broker reconnection.
//!
//! The connection kernel consults a [`Backoff`] every time the event loop
//! reports a recoverable connection error. Delays grow geometrically:
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max_delay)
//! ```
//!
//! With the defaults (initial=1s, multiplier=2.0, max=60s):
//! - Attempt 1: wait 1s
//! - Attempt 2: wait 2s
//! - Attempt 3: wait 4s
//! - ...
//! - Attempt 7+: wait 60s (capped)
//!
//! The schedule is reset as soon as a CONNACK is received.

use std::time::Duration;

use thiserror::Error;

use super::config::Config;

/// Error type for backoff exhaustion.
#[derive(Debug, Error)]
pub enum BackoffError {
    /// Maximum reconnect attempts exceeded with the given limit.
    #[error("Maximum number of reconnect attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Exponential backoff controller for reconnect pacing.
///
/// Not shared between tasks: the kernel owns its instance exclusively.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    /// `None` retries forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates a backoff with unlimited attempts.
    ///
    /// A `multiplier` below 1.0 is clamped to 1.0 (constant delay).
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(initial);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier: multiplier.max(1.0),
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Builds the reconnect schedule described by the transport configuration.
    ///
    /// `max_reconnect_attempts = 0` means unlimited.
    pub fn from_config(config: &Config) -> Self {
        let backoff = Self::new(
            Duration::from_secs(config.reconnect_delay),
            Duration::from_secs(config.max_reconnect_delay),
            config.reconnect_multiplier,
        );
        match config.max_reconnect_attempts {
            0 => backoff,
            limit => backoff.with_max_attempts(limit),
        }
    }

    /// Caps the number of consecutive failed attempts.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Returns the schedule to its initial state after a successful connect.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the next sleep duration and advances the schedule.
    ///
    /// # Errors
    /// `BackoffError::MaxAttemptLimitError` once the configured limit is spent.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt = self.attempt.saturating_add(1);

        if let Some(limit) = self.max_attempts {
            if self.attempt > limit {
                return Err(BackoffError::MaxAttemptLimitError(limit));
            }
        }

        let sleep = self.current_delay;
        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(next.min(self.max_delay.as_secs_f64()));

        Ok(sleep)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for Backoff {
    /// 1s initial delay, doubling, capped at 60s, unlimited attempts.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}
