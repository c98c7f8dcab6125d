//! Per-event delivery bookkeeping.
//!
//! ```text
//! Pending ──ok──────────────> Delivered
//!    │
//!    ├──transient, budget left──> Retrying ──backoff──> Pending
//!    ├──transient, no budget────> Failed
//!    ├──permanent───────────────> Failed
//!    └──shutdown────────────────> Abandoned   (also from Retrying)
//! ```

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::connection::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Retrying,
    Delivered,
    Failed,
    Abandoned,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Delivered | AttemptState::Failed | AttemptState::Abandoned
        )
    }
}

/// Owned by the delivery worker of a single event; dropped once terminal.
#[derive(Debug)]
pub struct DeliveryAttempt {
    pub event_id: Uuid,
    /// Sends started so far.
    pub attempts: u32,
    pub last_error: Option<ConnectionError>,
    pub next_retry_at: Option<Instant>,
    pub state: AttemptState,
}

impl DeliveryAttempt {
    pub fn new(event_id: Uuid) -> Self {
        Self {
            event_id,
            attempts: 0,
            last_error: None,
            next_retry_at: None,
            state: AttemptState::Pending,
        }
    }

    /// Marks the start of a send.
    pub fn begin(&mut self) {
        debug_assert_eq!(self.state, AttemptState::Pending);
        self.attempts += 1;
        self.next_retry_at = None;
    }

    pub fn delivered(&mut self) {
        self.state = AttemptState::Delivered;
    }

    pub fn failed(&mut self, error: ConnectionError) {
        self.last_error = Some(error);
        self.state = AttemptState::Failed;
    }

    /// Schedules the next send `delay` from now.
    pub fn retry_in(&mut self, error: ConnectionError, delay: Duration) {
        self.last_error = Some(error);
        self.next_retry_at = Some(Instant::now() + delay);
        self.state = AttemptState::Retrying;
    }

    /// Backoff elapsed; ready to send again.
    pub fn resume(&mut self) {
        debug_assert_eq!(self.state, AttemptState::Retrying);
        self.state = AttemptState::Pending;
    }

    pub fn abandon(&mut self) {
        if !self.state.is_terminal() {
            self.state = AttemptState::Abandoned;
        }
    }
}
