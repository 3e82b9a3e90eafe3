//! Record to envelope translation

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};
use tracing::info;

use super::envelope::{
    EventData, EventEnvelope, CONTENT_TYPE_JSON, EVENT_TYPE, KEY_EXTENSION, SPEC_VERSION,
};
use crate::kafka::ConsumedMessage;

/// Build the envelope for one consumed record.
///
/// Never fails: a value that is not a JSON object is carried as raw bytes.
/// The record key goes into the `key` extension, decoded as lossy UTF-8.
pub fn translate(message: &ConsumedMessage) -> EventEnvelope {
    let mut extensions = BTreeMap::new();
    if let Some(key) = &message.key {
        extensions.insert(
            KEY_EXTENSION.to_string(),
            String::from_utf8_lossy(key).into_owned(),
        );
    }

    EventEnvelope {
        spec_version: SPEC_VERSION,
        event_type: EVENT_TYPE,
        id: EventEnvelope::id_for(message.partition, message.offset),
        source: message.topic.clone(),
        time: message.timestamp,
        content_type: CONTENT_TYPE_JSON,
        extensions,
        data: decode_payload(message),
    }
}

fn decode_payload(message: &ConsumedMessage) -> EventData {
    match serde_json::from_slice::<Map<String, JsonValue>>(&message.value) {
        Ok(object) => EventData::Json(object),
        Err(e) => {
            info!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Payload is not a JSON object, forwarding raw bytes"
            );
            EventData::Binary(message.value.clone())
        }
    }
}
