//! Event delivery
//!
//! The [`Sink`] trait is the seam between the consume loop and the
//! destination. [`HttpSink`] delivers envelopes over HTTP; tests substitute
//! their own implementations.

pub mod http;

pub use http::HttpSink;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::EventEnvelope;

/// Delivery failures
#[derive(Error, Debug)]
pub enum SinkError {
    /// Transport-level failure, including the client timeout
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-2xx status
    #[error("sink returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The sink URI is not an absolute http(s) URL
    #[error("invalid sink URI: {0}")]
    InvalidUri(String),

    /// The payload could not be serialized
    #[error("failed to encode event payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for translated events
///
/// Implementations are shared by every partition task, so they must be
/// `Send + Sync`.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one envelope. `Ok` means the destination acknowledged it.
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), SinkError>;
}
