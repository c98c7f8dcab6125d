//! Configuration structures for the MQTT transport.
//!
//! All types support serde deserialization (the application embeds
//! [`Config`] as the `[transport]` table of its TOML file) and are checked
//! with the `validator` crate, so an invalid file fails at load time rather
//! than at connect time.
//!
//! # Base Topic
//!
//! `base_topic` namespaces everything this client publishes. With
//! `base_topic = "plant-3"` a publish to `kiln` goes to `plant-3/kiln`.
//! An empty base topic disables the prefix.
//!
//! # Examples
//!
//! ```toml
//! [transport]
//! base_topic = "plant-3"
//! host = "broker.example.com"
//! port = 8883
//! qos = 1
//!
//! [transport.tls]
//! ca_cert_path = "/etc/kilnbee/ca.pem"
//! client_cert_path = "/etc/kilnbee/service.cert"
//! client_key_path = "/etc/kilnbee/service.key"
//! ```

use std::{path::Path, time::Duration};

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Main MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Prefix applied to every published topic. Empty disables it.
    ///
    /// Must not contain MQTT wildcards.
    #[validate(
        length(max = 255, message = "Base topic must not exceed 255 characters"),
        custom(function = "validate_base_topic")
    )]
    pub base_topic: String,

    /// Broker hostname or IP address.
    ///
    /// DNS resolution happens at connection time, not validation time.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port. 1883 is plain MQTT, 8883 is MQTT over TLS.
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Unique identifier presented in CONNECT.
    ///
    /// Brokers reject or kick clients whose id collides with a live session,
    /// so the default is a fresh UUID per process.
    #[validate(length(
        min = 1,
        max = 36,
        message = "Client ID must be between 1 and 36 characters"
    ))]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// How long startup waits for the first CONNACK, in seconds.
    ///
    /// Exceeding it is a fatal startup error for the application.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Request a clean session from the broker.
    pub clean_session: bool,

    /// Quality of service used for every publish.
    ///
    /// - 0: no acknowledgement; a send completes once the packet is written
    /// - 1: completes on PUBACK (default)
    /// - 2: completes on PUBCOMP
    #[validate(range(min = 0, max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    /// Maximum number of unacknowledged QoS 1/2 publishes on the wire.
    #[validate(range(
        min = 1,
        max = 65535,
        message = "Max inflight must be between 1 and 65535"
    ))]
    pub max_inflight: u16,

    /// Maximum MQTT packet size in bytes, applied to both directions.
    ///
    /// Publishes that would exceed it are rejected before they reach the
    /// event loop.
    #[validate(range(
        min = 64,
        max = 268_435_455,
        message = "Max packet size must be between 64 bytes and 256 MiB"
    ))]
    pub max_packet_size: u32,

    /// Capacity of the client's request channel.
    ///
    /// A full channel makes a send fail fast with a retryable error.
    #[validate(range(
        min = 1,
        max = 65535,
        message = "Request channel capacity must be between 1 and 65535"
    ))]
    pub request_channel_capacity: usize,

    /// How long a single send waits for its acknowledgement, in milliseconds.
    #[validate(range(
        min = 10,
        max = 600_000,
        message = "Send timeout must be between 10 ms and 10 minutes"
    ))]
    pub send_timeout_ms: u64,

    /// Initial delay before the first reconnection attempt (seconds).
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    /// Upper bound for the reconnect delay (seconds).
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Max reconnect delay must be between 1 and 3600 seconds"
    ))]
    pub max_reconnect_delay: u64,

    /// Growth factor applied to the reconnect delay after each failure.
    #[validate(range(
        min = 1.0,
        max = 30.0,
        message = "Reconnect multiplier must be between 1 and 30"
    ))]
    pub reconnect_multiplier: f64,

    /// Consecutive failed reconnects tolerated before the kernel gives up.
    /// 0 retries forever.
    #[validate(range(
        max = 1000,
        message = "Max reconnect attempts must be between 0 and 1000"
    ))]
    pub max_reconnect_attempts: u32,

    /// Optional username for broker authentication.
    pub username: Option<String>,

    /// Optional password; only used together with `username`.
    pub password: Option<String>,

    /// TLS settings. Absent or without a CA path means plain TCP.
    #[validate(nested)]
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    /// Local development defaults: plain TCP to localhost, QoS 1.
    fn default() -> Self {
        Config {
            base_topic: String::new(),
            host: "localhost".to_string(),
            port: 1883,
            client_id: Uuid::new_v4().to_string(),
            keep_alive: 60,
            connection_timeout: 30,
            clean_session: false,
            qos: 1,
            max_inflight: 100,
            max_packet_size: 65_535,
            request_channel_capacity: 128,
            send_timeout_ms: 10_000,
            reconnect_delay: 1,
            max_reconnect_delay: 60,
            reconnect_multiplier: 2.0,
            max_reconnect_attempts: 0,
            username: None,
            password: None,
            tls: None,
        }
    }
}

impl Config {
    /// QoS as the rumqttc enum. Out-of-range values fall back to AtLeastOnce;
    /// validation rejects them before this is reached.
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    /// Returns the TLS settings only when they actually enable TLS.
    pub fn tls_enabled(&self) -> Option<&TlsConfig> {
        self.tls.as_ref().filter(|tls| tls.is_enabled())
    }
}

fn validate_base_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.contains(['+', '#']) {
        return Err(ValidationError::new("wildcard_in_base_topic")
            .with_message("Base topic must not contain MQTT wildcards".into()));
    }
    Ok(())
}

/// TLS/SSL configuration for broker connections.
///
/// Paths point at PEM files. Existence is checked by validation; contents
/// are read when the client is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    /// CA certificate used to verify the broker. Required to enable TLS.
    #[validate(custom(
        function = "validate_file_path",
        message = "CA certificate file does not exist"
    ))]
    pub ca_cert_path: Option<String>,

    /// Client certificate for mutual TLS. Must be paired with `client_key_path`.
    #[validate(custom(
        function = "validate_file_path",
        message = "Client certificate file does not exist"
    ))]
    pub client_cert_path: Option<String>,

    /// Unencrypted PEM private key for mutual TLS.
    #[validate(custom(
        function = "validate_file_path",
        message = "Client key file does not exist"
    ))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    /// Mutual TLS: CA plus client certificate and key.
    pub fn new(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
        }
    }

    /// Server verification only.
    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: None,
            client_key_path: None,
        }
    }

    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.ca_cert_path.is_some()
    }

    /// Checks that the CA is present, every configured file exists, and the
    /// client certificate and key are either both set or both absent.
    pub fn validate_config(&self) -> Result<(), ValidationError> {
        let Some(ca) = self.ca_cert_path.as_deref() else {
            return Err(ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required".into()));
        };
        validate_file_path(ca)?;

        match (
            self.client_cert_path.as_deref(),
            self.client_key_path.as_deref(),
        ) {
            (Some(cert), Some(key)) => {
                validate_file_path(cert)?;
                validate_file_path(key)?;
                Ok(())
            }
            (None, None) => Ok(()),
            _ => Err(ValidationError::new("incomplete_client_auth").with_message(
                "Both client certificate and key must be provided or neither".into(),
            )),
        }
    }
}

/// Validates that a path is non-empty and names an existing regular file.
fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }

    if !path_obj.is_file() {
        return Err(ValidationError::new("not_a_file")
            .with_message(format!("Path is not a file: {path}").into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.qos(), QoS::AtLeastOnce);
        assert!(config.tls_enabled().is_none());
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let config = Config {
            qos: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_base_topic_rejected() {
        let config = Config {
            base_topic: "plant/+/kiln".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_host_rejected() {
        let config = Config {
            host: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            host = "broker.example.com"
            port = 8883
            qos = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "broker.example.com");
        assert_eq!(config.qos(), QoS::ExactlyOnce);
        assert_eq!(config.keep_alive, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_missing_ca_file() {
        let tls = TlsConfig::with_ca_only("/nonexistent/ca.pem");
        assert!(tls.validate_config().is_err());
        assert!(tls.validate().is_err());
    }

    #[test]
    fn test_tls_incomplete_client_auth() {
        let dir = TempDir::new().unwrap();
        let ca = dir.path().join("ca.pem");
        File::create(&ca).unwrap().write_all(b"ca").unwrap();

        let tls = TlsConfig {
            ca_cert_path: Some(ca.to_string_lossy().into_owned()),
            client_cert_path: Some(ca.to_string_lossy().into_owned()),
            client_key_path: None,
        };
        let err = tls.validate_config().unwrap_err();
        assert_eq!(err.code, "incomplete_client_auth");
    }

    #[test]
    fn test_tls_disabled_without_ca() {
        let config = Config {
            tls: Some(TlsConfig::default()),
            ..Default::default()
        };
        assert!(config.tls_enabled().is_none());
    }
}
