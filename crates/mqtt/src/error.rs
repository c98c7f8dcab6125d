//! Error type for MQTT transport operations.
//!
//! `TransferError` aggregates failures from configuration, client setup,
//! the rumqttc event loop and individual sends. Callers that retry sends
//! should consult [`TransferError::is_retryable`] rather than matching
//! variants themselves.
//!
//! # Categories
//!
//! **Configuration / setup** (fail fast at startup):
//! - `ConfigError`, `ClientSetup`, `Io`
//!
//! **Per-message rejections** (retrying cannot help):
//! - `InvalidTopic`, `PayloadTooLarge`
//!
//! **Transient send failures** (retry later):
//! - `RequestQueueFull`, `AckTimeout`, `ConnectionLost`, `ConnectionClosed`
//!
//! **Connection kernel failures**:
//! - `ClientConnection`, `RetriesPolicy`, `ConnectTimeout`

use std::time::Duration;

use rumqttc::ConnectReturnCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Topic is empty, too long, or contains wildcards.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// The encoded PUBLISH would exceed `max_packet_size`.
    #[error("Payload too large: {size} bytes exceeds packet limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// MQTT client initialization failed (bad TLS files, malformed options).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Transport configuration failed validation.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The client's request channel did not accept the publish.
    ///
    /// Either the channel is full (the event loop is stalled or reconnecting)
    /// or the event loop is gone.
    #[error("Request queue rejected publish: {0}")]
    RequestQueueFull(#[from] rumqttc::ClientError),

    /// The broker did not acknowledge the publish in time.
    #[error("No acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// The connection dropped while the publish was awaiting its ack.
    #[error("Connection lost before acknowledgement: {0}")]
    ConnectionLost(String),

    /// The connection kernel has stopped; nothing will be delivered.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection to the broker failed or was lost.
    ///
    /// Boxed: `rumqttc::ConnectionError` is large.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// Reconnect attempts exhausted.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] super::backoff::BackoffError),

    /// No CONNACK within the startup connection timeout.
    #[error("Not connected within {0:?}")]
    ConnectTimeout(Duration),

    /// File I/O failure, typically reading TLS material.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}

impl TransferError {
    /// Whether repeating the same send later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::RequestQueueFull(_)
            | TransferError::AckTimeout(_)
            | TransferError::ConnectionLost(_)
            | TransferError::ConnectionClosed
            | TransferError::ConnectTimeout(_) => true,
            TransferError::ClientConnection(err) => !refused_for_auth(err),
            TransferError::InvalidTopic(_)
            | TransferError::PayloadTooLarge { .. }
            | TransferError::ClientSetup(_)
            | TransferError::ConfigError(_)
            | TransferError::RetriesPolicy(_)
            | TransferError::Io(_) => false,
        }
    }

    /// Whether the broker refused us for credential or authorization reasons.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            TransferError::ClientConnection(err) => refused_for_auth(err),
            _ => false,
        }
    }
}

fn refused_for_auth(err: &rumqttc::ConnectionError) -> bool {
    matches!(
        err,
        rumqttc::ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized
        )
    )
}
