//! CloudEvents envelopes built from Kafka records
//!
//! - `envelope`: the [`EventEnvelope`] value and its payload forms
//! - `translator`: pure conversion from a consumed record to an envelope

pub mod envelope;
pub mod translator;

pub use envelope::{
    EventData, EventEnvelope, CONTENT_TYPE_JSON, EVENT_TYPE, KEY_EXTENSION, SPEC_VERSION,
};
pub use translator::translate;
