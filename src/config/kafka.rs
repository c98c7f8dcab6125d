//! Kafka producer configuration.
//!
//! ```toml
//! [kafka]
//! brokers = "kafka.example.com:17855"
//! client_id = "kilnbee"
//! acks = "all"
//! message_timeout_ms = 30000
//!
//! [kafka.ssl]
//! ca_location = "./ca.pem"
//! certificate_location = "./service.cert"
//! key_location = "./service.key"
//! ```

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` bootstrap list.
    #[validate(length(min = 1, message = "Brokers cannot be empty"))]
    pub brokers: String,

    #[validate(length(min = 1, max = 255, message = "Client ID must be between 1 and 255 characters"))]
    pub client_id: String,

    /// Broker acknowledgements required per record: `0`, `1` or `all`.
    #[validate(custom(function = "validate_acks"))]
    pub acks: String,

    /// How long librdkafka keeps a record queued or in retry before failing it.
    #[validate(range(
        min = 1,
        max = 900_000,
        message = "message_timeout_ms must be between 1 and 900000"
    ))]
    pub message_timeout_ms: u64,

    /// Mutual TLS. Plaintext when absent.
    #[validate(nested)]
    pub ssl: Option<SslConfig>,

    /// Raw librdkafka properties, applied last.
    pub extra: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        KafkaConfig {
            brokers: "localhost:9092".to_string(),
            client_id: "kilnbee".to_string(),
            acks: "all".to_string(),
            message_timeout_ms: 30_000,
            ssl: None,
            extra: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// librdkafka properties for the producer, in the order they are set.
    pub fn client_properties(&self) -> Vec<(String, String)> {
        let mut props = vec![
            ("bootstrap.servers".to_string(), self.brokers.clone()),
            ("client.id".to_string(), self.client_id.clone()),
            ("acks".to_string(), self.acks.clone()),
            (
                "message.timeout.ms".to_string(),
                self.message_timeout_ms.to_string(),
            ),
        ];

        if let Some(ssl) = &self.ssl {
            props.push(("security.protocol".to_string(), "ssl".to_string()));
            props.push(("ssl.ca.location".to_string(), ssl.ca_location.clone()));
            props.push((
                "ssl.certificate.location".to_string(),
                ssl.certificate_location.clone(),
            ));
            props.push(("ssl.key.location".to_string(), ssl.key_location.clone()));
        }

        props.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        props
    }
}

/// PEM files for a mutually authenticated broker connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SslConfig {
    /// CA certificate used to verify the brokers.
    #[validate(custom(function = "validate_file_path"))]
    pub ca_location: String,

    /// Client certificate presented to the brokers.
    #[validate(custom(function = "validate_file_path"))]
    pub certificate_location: String,

    /// Private key for `certificate_location`.
    #[validate(custom(function = "validate_file_path"))]
    pub key_location: String,
}

fn validate_acks(acks: &str) -> Result<(), ValidationError> {
    match acks {
        "0" | "1" | "-1" | "all" => Ok(()),
        _ => Err(ValidationError::new("invalid_acks")
            .with_message(format!("acks must be 0, 1 or all, got {acks:?}").into())),
    }
}

fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }
    if !Path::new(path).is_file() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }
    Ok(())
}
