//! Event generation and reliable delivery.

pub mod attempt;
pub mod connection;
pub mod error;
pub mod event;
pub mod executor;
#[cfg(feature = "kilnbee-kafka")]
pub mod kafka;
pub mod publisher;
pub mod retry;
pub mod source;

pub use connection::{Connection, ConnectionError, Disposition};
pub use error::{DeliveryError, ShutdownError};
pub use event::{Encoder, JsonEncoder, KeyedJsonEncoder, SensorEvent};
pub use executor::Executor;
#[cfg(feature = "kilnbee-kafka")]
pub use kafka::KafkaConnection;
pub use publisher::{DeliveryHandle, DeliveryReceipt, PublisherStats, ReliablePublisher};
pub use retry::RetryPolicy;
pub use source::EventSource;
