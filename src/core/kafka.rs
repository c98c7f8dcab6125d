//! Kafka transport over an rdkafka [`FutureProducer`].
//!
//! Receipts carry the partition and offset the broker assigned to the record.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::{
    config::ClientConfig,
    error::{KafkaError, RDKafkaErrorCode},
    producer::{FutureProducer, FutureRecord, Producer},
};
use tracing::{debug, warn};

use super::connection::{Connection, ConnectionError, Offset, Partition};
use crate::config::kafka::KafkaConfig;

pub struct KafkaConnection {
    producer: FutureProducer,
    flush_timeout: Duration,
}

impl KafkaConnection {
    /// Creates the producer. Brokers are contacted lazily on the first send.
    pub fn from_config(config: &KafkaConfig) -> Result<Self, ConnectionError> {
        let mut client = ClientConfig::new();
        for (key, value) in config.client_properties() {
            client.set(key, value);
        }

        let producer: FutureProducer = client.create()?;
        debug!(brokers = %config.brokers, "Kafka producer created");

        Ok(Self {
            producer,
            flush_timeout: config.message_timeout(),
        })
    }
}

#[async_trait]
impl Connection for KafkaConnection {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        value: Bytes,
    ) -> Result<(Partition, Offset), ConnectionError> {
        let record = FutureRecord::to(topic).key(key).payload(value.as_ref());

        // A full local queue fails at once and is retried by the publisher.
        let (partition, offset) = self
            .producer
            .send(record, Duration::ZERO)
            .await
            .map_err(|(err, _)| ConnectionError::from(err))?;

        let partition = Partition::try_from(partition).map_err(|_| {
            ConnectionError::Network(format!("broker returned partition {partition}"))
        })?;
        let offset = Offset::try_from(offset)
            .map_err(|_| ConnectionError::Network(format!("broker returned offset {offset}")))?;
        Ok((partition, offset))
    }

    async fn close(&self) {
        if let Err(e) = self.producer.flush(self.flush_timeout) {
            warn!(error = %e, "Kafka producer flush failed");
        }
    }
}

impl From<KafkaError> for ConnectionError {
    fn from(err: KafkaError) -> Self {
        let message = err.to_string();
        match err.rdkafka_error_code() {
            Some(
                RDKafkaErrorCode::MessageSizeTooLarge
                | RDKafkaErrorCode::InvalidMessageSize
                | RDKafkaErrorCode::InvalidTopic
                | RDKafkaErrorCode::UnknownTopic,
            ) => ConnectionError::Rejected(message),
            Some(
                RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::ClusterAuthorizationFailed
                | RDKafkaErrorCode::SaslAuthenticationFailed
                | RDKafkaErrorCode::Authentication,
            ) => ConnectionError::Unauthorized(message),
            Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
                ConnectionError::Timeout(message)
            }
            Some(RDKafkaErrorCode::QueueFull) => ConnectionError::Unavailable(message),
            _ => match err {
                KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) => {
                    ConnectionError::Rejected(message)
                }
                KafkaError::Canceled => ConnectionError::Unavailable(message),
                _ => ConnectionError::Network(message),
            },
        }
    }
}
