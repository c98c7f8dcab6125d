//! High-level MQTT manager that wires the transport together.
//!
//! The `MqttManager` is the entry point for applications. It:
//! 1. Validates the transport configuration
//! 2. Builds the client, the ack tracker and the connection kernel
//! 3. Spawns the kernel on the runtime
//! 4. Returns an `MqttInstance` for application use
//!
//! # Typical Usage
//!
//! ```ignore
//! let instance = MqttManager::from_config(config)?.build_and_start().await?;
//! instance.wait_connected(Duration::from_secs(30)).await?;
//!
//! let ack = instance.producer().send("kiln", &id, payload).await?;
//!
//! instance.shutdown().await?;
//! ```

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use validator::Validate;

use super::{
    acks::{Ack, AckTracker},
    backoff::Backoff,
    client::ClientBuilder,
    config::Config,
    connection::ConnectionKernel,
    error::TransferError,
    producer::Producer,
    state::ConnectionState,
};

type KernelHandle = JoinHandle<Result<(), TransferError>>;

/// Builds an [`MqttInstance`] from configuration.
pub struct MqttManager {
    config: Config,
}

impl MqttManager {
    /// # Errors
    /// `TransferError::ConfigError` if `config` fails validation.
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Manager with default settings for the given broker.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, TransferError> {
        Self::from_config(Config {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds the client and spawns the connection kernel.
    ///
    /// Returns as soon as the kernel is running; the connection itself is
    /// established asynchronously. Use [`MqttInstance::wait_connected`] to
    /// gate on it.
    pub async fn build_and_start(self) -> Result<MqttInstance, TransferError> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            base_topic = %self.config.base_topic,
            client_id = %self.config.client_id,
            tls = self.config.tls_enabled().is_some(),
            "Building MQTT transport"
        );

        let (client, event_loop) = ClientBuilder::from_config(&self.config)?.build()?;

        let acks = Arc::new(AckTracker::new());
        let connection_cancel = CancellationToken::new();
        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            acks.clone(),
            Backoff::from_config(&self.config),
            connection_cancel.clone(),
        );
        let state_rx = kernel.subscribe_state();

        let handle = tokio::spawn(async move {
            let result = kernel.run().await;
            if let Err(e) = &result {
                error!(error = %e, "MQTT connection kernel exited with error");
            }
            result
        });

        Ok(MqttInstance {
            producer: Producer::new(client, acks, &self.config),
            state_rx,
            connection_cancel,
            kernel: Arc::new(Mutex::new(Some(handle))),
            send_timeout: self.config.send_timeout(),
        })
    }
}

/// Running transport: a producer plus control over the connection kernel.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct MqttInstance {
    producer: Producer,
    state_rx: watch::Receiver<ConnectionState>,

    /// Stops the connection kernel.
    connection_cancel: CancellationToken,

    /// Taken by the first `shutdown` call.
    kernel: Arc<Mutex<Option<KernelHandle>>>,

    send_timeout: Duration,
}

impl MqttInstance {
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn base_topic(&self) -> &str {
        self.producer.base_topic()
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// See [`Producer::send`].
    pub async fn send(&self, topic: &str, key: &str, payload: Bytes) -> Result<Ack, TransferError> {
        self.producer.send(topic, key, payload).await
    }

    /// Waits for the first successful CONNACK.
    ///
    /// # Errors
    /// - `ConnectTimeout` if not connected within `timeout`
    /// - `ConnectionClosed` if the kernel stopped first (fatal error,
    ///   reconnect exhaustion or shutdown)
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransferError> {
        let mut state_rx = self.state_rx.clone();
        let wait = async move {
            state_rx
                .wait_for(|state| state.is_connected() || state.is_terminal())
                .await
                .map(|state| state.clone())
        };

        match tokio::time::timeout(timeout, wait).await {
            Err(_) => Err(TransferError::ConnectTimeout(timeout)),
            Ok(Err(_)) => Err(TransferError::ConnectionClosed),
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(Ok(state)) => {
                error!(state = %state, "Connection kernel stopped before connecting");
                Err(TransferError::ConnectionClosed)
            }
        }
    }

    /// Stops the connection after in-flight sends settle.
    ///
    /// Sends already waiting for an ack get up to `send_timeout_ms`; after
    /// that the kernel sends DISCONNECT and exits. Idempotent: later calls
    /// return `Ok(())` immediately.
    ///
    /// # Errors
    /// The kernel's own exit error, if it failed rather than stopped.
    pub async fn shutdown(&self) -> Result<(), TransferError> {
        let Some(handle) = self.kernel.lock().await.take() else {
            return Ok(());
        };

        let drain = self.producer.publish_drain();
        if tokio::time::timeout(self.send_timeout, drain.wait_idle())
            .await
            .is_err()
        {
            warn!(
                inflight = drain.inflight(),
                "Sends still pending at transport shutdown"
            );
        }

        self.connection_cancel.cancel();

        match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                error!(error = %join_err, "MQTT connection kernel task failed");
                Err(TransferError::ConnectionClosed)
            }
        }
    }
}
