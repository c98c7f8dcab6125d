//! MQTT client builder with TLS and credential support.
//!
//! `ClientBuilder` hides the rumqttc `MqttOptions` plumbing: it produces an
//! `AsyncClient` (cloneable handle used by [`Producer`](crate::Producer)) and
//! the `EventLoop` that the [`ConnectionKernel`](crate::ConnectionKernel)
//! drives.
//!
//! # Examples
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::new("kiln-01", "localhost", 1883, 128)?
//!     .keep_alive(30)
//!     .credentials("kiln", "secret")
//!     .build()?;
//! ```
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?.build()?;
//! ```

use std::{fs, time::Duration};

use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS, TlsConfiguration, Transport};
use validator::Validate;

use super::{
    config::{Config, TlsConfig},
    error::TransferError,
};

/// Builder for an `AsyncClient` / `EventLoop` pair.
///
/// The pair must be used together: the client enqueues requests, the event
/// loop performs the network I/O. The client is `Clone + Send + Sync`; the
/// event loop must be polled from a single task.
pub struct ClientBuilder {
    opts: MqttOptions,

    /// Capacity of the client's request channel. Once it is full,
    /// `try_publish` fails instead of waiting.
    cap: usize,

    /// Seconds allowed for TCP/TLS connect and CONNACK; rumqttc's default when unset.
    connection_timeout: Option<u64>,

    tls_config: Option<TlsConfig>,
}

impl ClientBuilder {
    /// Creates a builder for a plain TCP connection.
    pub fn new(
        client_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        cap: usize,
    ) -> Result<Self, TransferError> {
        if cap == 0 {
            return Err(TransferError::ClientSetup(
                "Request channel capacity must be at least 1".into(),
            ));
        }

        Ok(Self {
            opts: MqttOptions::new(client_id, host, port),
            cap,
            connection_timeout: None,
            tls_config: None,
        })
    }

    /// Creates a builder from validated transport configuration.
    ///
    /// Applies keep-alive, session, inflight window, packet size limits,
    /// credentials, the `{base_topic}/status` last will, and TLS when enabled.
    ///
    /// # Errors
    /// `TransferError::ConfigError` if `config` fails validation.
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        config.validate()?;

        let mut builder = Self::new(
            config.client_id.clone(),
            config.host.clone(),
            config.port,
            config.request_channel_capacity,
        )?
        .keep_alive(config.keep_alive)
        .clean_session(config.clean_session)
        .max_inflight(config.max_inflight)
        .max_packet_size(
            config.max_packet_size as usize,
            config.max_packet_size as usize,
        )
        .connection_timeout(config.connection_timeout);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(username.clone(), password.clone());
        }

        if !config.base_topic.is_empty() {
            builder = builder.set_last_will(&config.base_topic);
        }

        builder.tls_config = config.tls_enabled().cloned();

        Ok(builder)
    }

    /// Configures mutual TLS (CA plus client certificate and key).
    ///
    /// Files are read in `build()`, not here.
    pub fn with_tls(
        mut self,
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        self.tls_config = Some(TlsConfig::new(
            ca_cert_path,
            client_cert_path,
            client_key_path,
        ));
        self
    }

    /// Configures server-authenticated TLS only.
    pub fn with_tls_ca_only(mut self, ca_cert_path: impl Into<String>) -> Self {
        self.tls_config = Some(TlsConfig::with_ca_only(ca_cert_path));
        self
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    /// Applied to the event loop's network options in `build()`.
    pub fn connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout = Some(secs);
        self
    }

    pub fn max_packet_size(mut self, incoming: usize, outgoing: usize) -> Self {
        self.opts.set_max_packet_size(incoming, outgoing);
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    /// Sets username/password sent in CONNECT. Pair with TLS outside a lab.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    /// Maximum number of unacknowledged QoS 1/2 publishes on the wire.
    pub fn max_inflight(mut self, max: u16) -> Self {
        self.opts.set_inflight(max);
        self
    }

    /// Registers a retained `offline` last will on `{base_topic}/status`.
    pub fn set_last_will(mut self, base_topic: &str) -> Self {
        let last_will = LastWill::new(
            format!("{base_topic}/status"),
            b"offline".to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        self.opts.set_last_will(last_will);
        self
    }

    fn load_file(path: &str) -> Result<Vec<u8>, TransferError> {
        Ok(fs::read(path)?)
    }

    fn build_tls_transport(tls_config: &TlsConfig) -> Result<Transport, TransferError> {
        tls_config
            .validate_config()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {e}")))?;

        let ca_path = tls_config
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| TransferError::ClientSetup("CA certificate path is not set".into()))?;
        let ca = Self::load_file(ca_path)?;

        let client_auth = match (
            tls_config.client_cert_path.as_deref(),
            tls_config.client_key_path.as_deref(),
        ) {
            (Some(cert), Some(key)) => Some((Self::load_file(cert)?, Self::load_file(key)?)),
            _ => None,
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            client_auth,
            alpn: None,
        }))
    }

    /// Consumes the builder and creates the client and its event loop.
    ///
    /// # Errors
    /// `ClientSetup` or `Io` if TLS material is invalid or unreadable.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let mut opts = self.opts;
        if let Some(tls_config) = &self.tls_config {
            opts.set_transport(Self::build_tls_transport(tls_config)?);
        }

        let (client, mut event_loop) = AsyncClient::new(opts, self.cap);
        if let Some(secs) = self.connection_timeout {
            let mut network = event_loop.network_options();
            network.set_connection_timeout(secs);
            event_loop.set_network_options(network);
        }

        Ok((client, event_loop))
    }
}
