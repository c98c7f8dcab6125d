//! Sensor event model and its wire encoding.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// One reading from the kiln sensors.
///
/// Immutable once built by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub id: Uuid,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Degrees Celsius, 0..=40.
    pub temperature1: f32,

    /// Degrees Celsius, 0..=40.
    pub temperature2: f32,

    /// Relative humidity in percent, 0..=100.
    pub humidity: f32,

    /// Load cell reading, 0..=9999.
    pub weight: u32,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns an event into the `(key, value)` pair handed to the connection.
pub trait Encoder: Send + Sync {
    fn encode(&self, event: &SensorEvent) -> Result<(String, Bytes), EncodeError>;
}

/// Keys by event id; the value is the whole event as JSON, id included, so
/// the key survives transports without native message keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, event: &SensorEvent) -> Result<(String, Bytes), EncodeError> {
        let value = serde_json::to_vec(event)?;
        Ok((event.id.to_string(), Bytes::from(value)))
    }
}

/// Kafka record layout: the key is the JSON document `{"id":"<uuid>"}` and
/// the value carries the reading without its id.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedJsonEncoder;

#[derive(Serialize)]
struct RecordKey {
    id: Uuid,
}

#[derive(Serialize)]
struct RecordValue {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    temperature1: f32,
    temperature2: f32,
    humidity: f32,
    weight: u32,
}

impl Encoder for KeyedJsonEncoder {
    fn encode(&self, event: &SensorEvent) -> Result<(String, Bytes), EncodeError> {
        let key = serde_json::to_string(&RecordKey { id: event.id })?;
        let value = serde_json::to_vec(&RecordValue {
            timestamp: event.timestamp,
            temperature1: event.temperature1,
            temperature2: event.temperature2,
            humidity: event.humidity,
            weight: event.weight,
        })?;
        Ok((key, Bytes::from(value)))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn event() -> SensorEvent {
        SensorEvent {
            id: Uuid::nil(),
            timestamp: datetime!(2024-03-01 12:30:00 UTC),
            temperature1: 21.5,
            temperature2: 22.0,
            humidity: 55.0,
            weight: 1234,
        }
    }

    #[test]
    fn test_json_encoder_keys_by_id() {
        let event = event();
        let (key, value) = JsonEncoder.encode(&event).unwrap();

        assert_eq!(key, "00000000-0000-0000-0000-000000000000");

        let json: serde_json::Value = serde_json::from_slice(&value).unwrap();
        assert_eq!(json["id"], key.as_str());
        assert_eq!(json["timestamp"], "2024-03-01T12:30:00Z");
        assert_eq!(json["weight"], 1234);
        assert_eq!(json["humidity"], 55.0);
    }

    #[test]
    fn test_json_value_decodes_back() {
        let event = event();
        let (_, value) = JsonEncoder.encode(&event).unwrap();
        let decoded: SensorEvent = serde_json::from_slice(&value).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_keyed_encoder_splits_id_into_key() {
        let event = event();
        let (key, value) = KeyedJsonEncoder.encode(&event).unwrap();

        assert_eq!(key, r#"{"id":"00000000-0000-0000-0000-000000000000"}"#);

        let json: serde_json::Value = serde_json::from_slice(&value).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["timestamp"], "2024-03-01T12:30:00Z");
        assert_eq!(json["temperature1"], 21.5);
        assert_eq!(json["temperature2"], 22.0);
        assert_eq!(json["weight"], 1234);
    }
}
