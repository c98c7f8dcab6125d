//! kilnbee: synthetic kiln sensor publisher with reliable delivery
//!
//! The binary generates readings of two temperatures, humidity and a load-cell
//! weight at a fixed cadence and publishes each one to a broker topic. Delivery
//! goes through a publisher that retries transient failures with capped
//! exponential backoff, bounds the number of events in flight, and shuts down
//! by draining or abandoning pending work.
//!
//! ## Modules
//!
//! * `config`: Configuration structures, loading, validation, and defaults.
//!   Supports TOML configuration files with validation via the `validator` crate.
//!
//! * `core`: Runtime components:
//!   - Event source and sensor event model
//!   - Reliable publisher, retry policy and delivery attempts
//!   - `Connection` trait the publisher sends through
//!   - Executor loop tying the source to the publisher
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.
//!
//! ## Features
//!
//! * `kilnbee-mqtt`: MQTT transport from the `kilnbee_mqtt` crate, used as the
//!   broker `Connection` (default: enabled).
//! * `kilnbee-kafka`: Kafka transport over rdkafka's `FutureProducer`, selected
//!   with `backend = "kafka"` (requires librdkafka to build).

pub mod config;
pub mod core;
pub mod logger;
