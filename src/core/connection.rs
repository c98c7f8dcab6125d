//! Broker connection seam.
//!
//! The publisher only needs `send` and `close`. Implementations must be
//! `Send + Sync` and must accept concurrent `send` calls from many delivery
//! workers; any serialization the underlying client requires is the
//! implementation's business.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub type Partition = u32;
pub type Offset = u64;

/// Whether a failed send may succeed if repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("timed out: {0}")]
    Timeout(String),

    /// Broker or local client temporarily unable to take the message.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(String),

    /// The message itself is unacceptable (malformed, oversized, bad topic).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl ConnectionError {
    pub fn disposition(&self) -> Disposition {
        match self {
            ConnectionError::Timeout(_)
            | ConnectionError::Unavailable(_)
            | ConnectionError::Network(_) => Disposition::Transient,
            ConnectionError::Rejected(_) | ConnectionError::Unauthorized(_) => {
                Disposition::Permanent
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.disposition() == Disposition::Transient
    }
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Publishes one message and resolves once the broker has accepted it.
    async fn send(
        &self,
        topic: &str,
        key: &str,
        value: Bytes,
    ) -> Result<(Partition, Offset), ConnectionError>;

    /// Releases the connection. Called exactly once by the publisher.
    async fn close(&self);
}

#[cfg(feature = "kilnbee-mqtt")]
mod mqtt {
    use kilnbee_mqtt::{MqttInstance, TransferError};
    use tracing::warn;

    use super::*;

    impl From<TransferError> for ConnectionError {
        fn from(err: TransferError) -> Self {
            let message = err.to_string();
            match err {
                TransferError::InvalidTopic(_)
                | TransferError::PayloadTooLarge { .. }
                | TransferError::ConfigError(_)
                | TransferError::ClientSetup(_) => ConnectionError::Rejected(message),
                TransferError::AckTimeout(_) | TransferError::ConnectTimeout(_) => {
                    ConnectionError::Timeout(message)
                }
                TransferError::RequestQueueFull(_)
                | TransferError::ConnectionClosed
                | TransferError::RetriesPolicy(_) => ConnectionError::Unavailable(message),
                ref e if e.is_auth_failure() => ConnectionError::Unauthorized(message),
                TransferError::ConnectionLost(_)
                | TransferError::ClientConnection(_)
                | TransferError::Io(_) => ConnectionError::Network(message),
            }
        }
    }

    /// MQTT has a single partition; offsets are the connection's ack sequence.
    #[async_trait]
    impl Connection for MqttInstance {
        async fn send(
            &self,
            topic: &str,
            key: &str,
            value: Bytes,
        ) -> Result<(Partition, Offset), ConnectionError> {
            let ack = MqttInstance::send(self, topic, key, value).await?;
            Ok((0, ack.offset))
        }

        async fn close(&self) {
            if let Err(e) = self.shutdown().await {
                warn!(error = %e, "MQTT transport stopped with error");
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use std::time::Duration;

        use super::*;

        #[test]
        fn test_transfer_error_classification() {
            let cases = [
                (TransferError::InvalidTopic("#".into()), Disposition::Permanent),
                (
                    TransferError::PayloadTooLarge { size: 2, limit: 1 },
                    Disposition::Permanent,
                ),
                (
                    TransferError::AckTimeout(Duration::from_secs(1)),
                    Disposition::Transient,
                ),
                (TransferError::ConnectionClosed, Disposition::Transient),
                (
                    TransferError::ConnectionLost("reset".into()),
                    Disposition::Transient,
                ),
            ];

            for (err, expected) in cases {
                let described = err.to_string();
                assert_eq!(
                    ConnectionError::from(err).disposition(),
                    expected,
                    "{described}"
                );
            }
        }

        #[test]
        fn test_auth_refusal_is_unauthorized() {
            use kilnbee_mqtt::rumqttc::{ConnectReturnCode, ConnectionError as MqttConnectionError};

            let err: TransferError =
                MqttConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized).into();
            assert!(matches!(
                ConnectionError::from(err),
                ConnectionError::Unauthorized(_)
            ));
        }
    }
}
