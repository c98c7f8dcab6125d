use thiserror::Error;

use super::{connection::ConnectionError, event::EncodeError};

/// Terminal outcome of an event that was not delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("permanent delivery failure after {attempts} attempt(s): {source}")]
    Permanent {
        attempts: u32,
        #[source]
        source: ConnectionError,
    },

    #[error("retries exhausted after {attempts} attempt(s), last error: {last}")]
    RetriesExhausted { attempts: u32, last: ConnectionError },

    #[error("publisher is closed")]
    Closed,

    /// Shutdown cancelled the attempt before it reached another outcome.
    #[error("delivery abandoned on shutdown after {attempts} attempt(s)")]
    Abandoned { attempts: u32 },

    #[error("failed to encode event: {0}")]
    Encode(#[from] EncodeError),
}

impl DeliveryError {
    /// Attempts made against the connection; zero when nothing was sent.
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::Permanent { attempts, .. }
            | DeliveryError::RetriesExhausted { attempts, .. }
            | DeliveryError::Abandoned { attempts } => *attempts,
            DeliveryError::Closed | DeliveryError::Encode(_) => 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("shutdown timed out, {abandoned} in-flight delivery(ies) abandoned")]
    Timeout { abandoned: usize },
}
