//! Reliable publisher configuration.
//!
//! ```toml
//! [publisher]
//! topic = "kiln"
//! max_in_flight = 100
//!
//! [publisher.retry]
//! max_attempts = 5
//! base_delay_ms = 100
//! max_delay_ms = 10000
//! jitter_ms = 100
//!
//! [publisher.shutdown]
//! drain = true
//! timeout_secs = 10
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PublisherConfig {
    /// Topic every event is published to, fixed for the process lifetime.
    #[validate(
        length(min = 1, max = 255, message = "Topic must be between 1 and 255 characters"),
        custom(function = "validate_topic")
    )]
    pub topic: String,

    /// Upper bound on events concurrently in delivery. 1 serializes delivery.
    #[validate(range(min = 1, max = 65_535, message = "max_in_flight must be between 1 and 65535"))]
    pub max_in_flight: usize,

    #[validate(nested)]
    pub retry: RetryConfig,

    #[validate(nested)]
    pub shutdown: ShutdownConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            topic: "kiln".to_string(),
            max_in_flight: 100,
            retry: RetryConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.contains(['+', '#', '\0']) {
        return Err(ValidationError::new("invalid_topic")
            .with_message("Topic must not contain wildcards or NUL".into()));
    }
    Ok(())
}

/// Bounded exponential backoff for transient delivery failures.
///
/// `delay(n) = min(base_delay * 2^(n-1), max_delay) + uniform(0..=jitter)`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_retry_bounds"))]
pub struct RetryConfig {
    /// Total attempts per event, the first one included.
    #[validate(range(min = 1, max = 100, message = "max_attempts must be between 1 and 100"))]
    pub max_attempts: u32,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,

    pub jitter_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter_ms: 100,
        }
    }
}

fn validate_retry_bounds(config: &RetryConfig) -> Result<(), ValidationError> {
    if config.max_delay_ms < config.base_delay_ms {
        return Err(ValidationError::new("invalid_retry_bounds")
            .with_message("max_delay_ms must not be lower than base_delay_ms".into()));
    }
    Ok(())
}

/// What the binary does with in-flight deliveries on Ctrl+C.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Wait for in-flight deliveries (up to `timeout_secs`) instead of
    /// abandoning them.
    pub drain: bool,

    #[validate(range(min = 1, max = 3600, message = "timeout_secs must be between 1 and 3600"))]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            drain: true,
            timeout_secs: 10,
        }
    }
}
