//! Event source configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourceConfig {
    /// Time between two readings, in milliseconds.
    #[validate(range(
        min = 1,
        max = 86_400_000,
        message = "Interval must be between 1 ms and 24 hours"
    ))]
    pub interval_ms: u64,
}

impl SourceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig { interval_ms: 1_000 }
    }
}
