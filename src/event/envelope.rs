//! CloudEvents 0.2 envelope types.
//!
//! The envelope is delivered in binary content mode, so attributes travel as
//! `ce-*` headers and [`EventData`] becomes the request body unchanged.
//!
//! # Example
//!
//! ```rust
//! use kafka_bridge::event::EventEnvelope;
//!
//! assert_eq!(EventEnvelope::id_for(2, 57), "partition:2/offset:57");
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

/// CloudEvents specification version produced by the bridge.
pub const SPEC_VERSION: &str = "0.2";

/// Event type of every envelope produced by the bridge.
pub const EVENT_TYPE: &str = "dev.knative.kafka.event";

/// Content type advertised for every envelope.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Extension attribute carrying the record key.
pub const KEY_EXTENSION: &str = "key";

/// Event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// The record value decoded as a JSON object.
    Json(Map<String, JsonValue>),

    /// The record value verbatim, when it is not a JSON object.
    Binary(Bytes),
}

impl EventData {
    /// Serialize the payload into the request body.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON object cannot be serialized
    pub fn to_body(&self) -> Result<Bytes, serde_json::Error> {
        match self {
            Self::Json(map) => serde_json::to_vec(map).map(Bytes::from),
            Self::Binary(bytes) => Ok(bytes.clone()),
        }
    }

    /// Readable rendering for debug logs.
    pub fn preview(&self) -> String {
        match self {
            Self::Json(map) => JsonValue::Object(map.clone()).to_string(),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// One CloudEvents envelope per Kafka record.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// CloudEvents specification version.
    pub spec_version: &'static str,

    /// Event type.
    pub event_type: &'static str,

    /// `partition:<p>/offset:<o>`, unique per record within a topic.
    pub id: String,

    /// Topic the record was read from.
    pub source: String,

    /// Record timestamp, if the broker provided one.
    pub time: Option<DateTime<Utc>>,

    /// Content type of the payload.
    pub content_type: &'static str,

    /// Extension attributes.
    pub extensions: BTreeMap<String, String>,

    /// Payload.
    pub data: EventData,
}

impl EventEnvelope {
    /// Deterministic event id for a record position.
    pub fn id_for(partition: i32, offset: i64) -> String {
        format!("partition:{}/offset:{}", partition, offset)
    }

    /// Record key carried in the `key` extension, if any.
    pub fn key(&self) -> Option<&str> {
        self.extensions.get(KEY_EXTENSION).map(String::as_str)
    }
}
