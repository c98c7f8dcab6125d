//! # kilnbee-mqtt: acknowledged MQTT publishing with automatic reconnection
//!
//! An async MQTT transport built on `rumqttc`. On top of the raw client it
//! adds:
//!
//! - **Per-publish acknowledgements**: [`Producer::send`] resolves when the
//!   broker confirms the message, with a packet id and a monotonically
//!   increasing ack offset
//! - **Automatic reconnection** with exponential backoff
//! - **State monitoring** through a `watch` channel
//! - **TLS** with optional client certificate authentication
//! - **Error classification**: [`TransferError::is_retryable`]
//!
//! # Quick Start
//!
//! ```ignore
//! use kilnbee_mqtt::{Config, MqttManager};
//!
//! let instance = MqttManager::from_config(Config::default())?
//!     .build_and_start()
//!     .await?;
//! instance.wait_connected(std::time::Duration::from_secs(30)).await?;
//!
//! let ack = instance
//!     .send("kiln", "0b6f…", bytes::Bytes::from_static(b"{\"weight\":12}"))
//!     .await?;
//! println!("acknowledged at offset {}", ack.offset);
//!
//! instance.shutdown().await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ MqttManager / MqttInstance           │
//! └────────────┬─────────────────────────┘
//!              │
//! ┌────────────▼─────────────────────────┐
//! │ Producer ──── AckTracker ─── Kernel  │
//! │ ClientBuilder, Backoff, State        │
//! └────────────┬─────────────────────────┘
//!              │
//! ┌────────────▼─────────────────────────┐
//! │ rumqttc AsyncClient & EventLoop      │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Configuration
//!
//! [`Config`] deserializes from TOML and is validated before use:
//!
//! ```toml
//! base_topic = "plant-3"
//! host = "mqtt.example.com"
//! port = 8883
//! qos = 1
//! send_timeout_ms = 10000
//! max_reconnect_attempts = 0  # Unlimited
//!
//! [tls]
//! ca_cert_path = "/etc/kilnbee/ca.pem"
//! ```

pub mod acks;
pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod producer;
pub mod state;

pub use acks::{Ack, AckTracker};
pub use backoff::{Backoff, BackoffError};
pub use client::ClientBuilder;
pub use config::{Config, TlsConfig};
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager};
pub use producer::{Producer, PublishDrain};
pub use rumqttc;
pub use state::ConnectionState;

/// Result type for MQTT operations.
pub type Result<T> = std::result::Result<T, TransferError>;
