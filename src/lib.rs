//! kafka-bridge - Kafka to CloudEvents HTTP bridge library
//!
//! Consumes a set of Kafka topics as a consumer group and forwards every
//! record to a single HTTP sink as a CloudEvents envelope. An offset is only
//! marked for commit after the sink acknowledged the corresponding event.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `adapter`: Owns configuration and sink, runs the consumer group
//! - `kafka`: Client settings, rebalance handling, per-partition claims
//! - `event`: Record to CloudEvents envelope translation
//! - `sink`: Delivery seam and the HTTP implementation
//! - `security`: Client certificate loading and broker chain verification
//! - `config`: Configuration management and validation
//! - `logging`: Tracing subscriber setup
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use kafka_bridge::{Adapter, AdapterConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AdapterConfig::load("config/bridge.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let adapter = Adapter::new(config)?;
//!     adapter.start(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod kafka;
pub mod logging;
pub mod security;
pub mod sink;

// Re-export commonly used types
pub use adapter::Adapter;
pub use config::AdapterConfig;
pub use error::{BridgeError, Result};
pub use event::{EventData, EventEnvelope};
pub use sink::{HttpSink, Sink, SinkError};

#[cfg(test)]
pub mod test_utils;
