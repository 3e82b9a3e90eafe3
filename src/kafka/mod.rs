//! Kafka consumer group plumbing
//!
//! - `client`: librdkafka settings, including SASL and TLS
//! - `context`: callbacks forwarding client errors and rebalances
//! - `message`: owned copy of a consumed record
//! - `session`: per-record translate, deliver, mark
//! - `dispatch`: the group-consume loop with per-partition claims

pub mod client;
pub mod context;
pub mod dispatch;
pub mod message;
pub mod session;

pub use client::{
    build_client_config, client_settings, security_protocol, verification_strategy,
};
pub use context::{BridgeContext, Claim, ClientError, RebalanceEvent};
pub use dispatch::{ClaimQueue, ConsumerCommand, PartitionDispatcher};
pub use message::ConsumedMessage;
pub use session::{BridgeConsumer, ConsumerSession, OffsetMarker, StoreOffsetMarker};
