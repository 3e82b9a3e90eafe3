//! Error types for the bridge
//!
//! This module defines the top-level error type returned by the adapter,
//! using `thiserror` for ergonomic error handling. Concern-specific errors
//! (certificates, sink delivery) live next to the code that raises them and
//! convert into [`BridgeError`].

use thiserror::Error;

use crate::security::CertificateError;
use crate::sink::SinkError;

/// Main error type for bridge operations
///
/// Every variant except `Sink` is fatal when returned from
/// [`crate::adapter::Adapter::start`]: the bridge cannot make progress and the
/// surrounding deployment is expected to restart the process.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client certificate or key could not be loaded
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// Kafka client could not be created
    #[error("Kafka client error: {0}")]
    Client(#[source] rdkafka::error::KafkaError),

    /// Consumer group could not subscribe to the topic set
    #[error("Consumer group error: {0}")]
    Subscribe(#[source] rdkafka::error::KafkaError),

    /// The group-consume loop hit an unrecoverable error
    #[error("Consume error: {0}")]
    Consume(#[source] rdkafka::error::KafkaError),

    /// Sink client could not be built
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// A background task panicked or was cancelled unexpectedly
    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias used at the binary edge
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
