//! Synthetic kiln readings at a fixed cadence.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::{rngs::StdRng, Rng, SeedableRng};
use time::OffsetDateTime;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::trace;
use uuid::Uuid;

use super::event::SensorEvent;
use crate::config::source::SourceConfig;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Infinite stream of [`SensorEvent`]s, one per interval.
///
/// The first [`next`](Self::next) resolves immediately. A consumer that falls
/// behind is not compensated with a burst: the cadence restarts from the late
/// emission.
pub struct EventSource {
    ticker: Interval,
    rng: StdRng,
}

impl EventSource {
    /// Seeds the generator from the wall clock.
    pub fn new(period: Duration) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_seed(period, seed)
    }

    /// Deterministic readings for a given seed.
    ///
    /// Periods below one millisecond are raised to it.
    pub fn with_seed(period: Duration, seed: u64) -> Self {
        let mut ticker = interval(period.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.interval())
    }

    pub fn period(&self) -> Duration {
        self.ticker.period()
    }

    pub async fn next(&mut self) -> SensorEvent {
        self.ticker.tick().await;
        let event = reading(&mut self.rng);
        trace!(id = %event.id, "Generated sensor reading");
        event
    }
}

/// One reading stamped with the current UTC time.
pub fn reading<R: Rng>(rng: &mut R) -> SensorEvent {
    SensorEvent {
        id: Uuid::new_v4(),
        timestamp: OffsetDateTime::now_utc(),
        temperature1: rng.random_range(0.0..40.0),
        temperature2: rng.random_range(0.0..40.0),
        humidity: rng.random_range(0.0..100.0),
        weight: rng.random_range(0..10_000),
    }
}
