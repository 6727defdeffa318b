//! Message envelope: caller payload plus delivery metadata.
//!
//! On the wire (both backends) the envelope is a flat JSON object: the caller's
//! payload fields merged with `timestamp`, `message_id` and `producer_service`.
//! Metadata fields take precedence over payload fields with the same name.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::TransportResult;

/// Caller-supplied message body: an opaque key -> value mapping.
pub type Payload = Map<String, Value>;

/// Envelope field carrying the send time (ISO-8601, UTC).
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Envelope field carrying the per-send UUID.
pub const MESSAGE_ID_FIELD: &str = "message_id";
/// Envelope field carrying the sending service's name.
pub const PRODUCER_SERVICE_FIELD: &str = "producer_service";

/// Payload plus delivery metadata, built fresh for each send.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    payload: Payload,
    message_id: String,
    timestamp: DateTime<Utc>,
    producer_service: String,
    partition_key: Option<String>,
}

impl Envelope {
    /// Wrap a payload. The caller's map is copied, never modified.
    pub fn build(payload: &Payload, producer_service: &str, partition_key: Option<&str>) -> Self {
        Self {
            payload: payload.clone(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            producer_service: producer_service.to_string(),
            partition_key: partition_key.map(str::to_string),
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn producer_service(&self) -> &str {
        &self.producer_service
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    /// Flat JSON object placed on the wire.
    pub fn to_json(&self) -> Value {
        let mut object = self.payload.clone();
        object.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        object.insert(
            MESSAGE_ID_FIELD.to_string(),
            Value::String(self.message_id.clone()),
        );
        object.insert(
            PRODUCER_SERVICE_FIELD.to_string(),
            Value::String(self.producer_service.clone()),
        );
        Value::Object(object)
    }

    /// JSON text, used as the SQS message body.
    pub fn to_body(&self) -> TransportResult<String> {
        Ok(serde_json::to_string(&self.to_json())?)
    }

    /// JSON bytes, used as the Kafka record value.
    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_json())?)
    }
}

/// Decode an inbound message body. Anything but a JSON object is rejected.
pub fn decode_payload(bytes: &[u8]) -> Result<Payload, serde_json::Error> {
    serde_json::from_slice(bytes)
}
