//! Per-session consumption behaviour
//!
//! A [`ConsumerSession`] is shared by every partition claim of the group
//! member. For each record it translates, delivers, and marks the offset only
//! when the sink acknowledged the event. A failed record is logged and
//! skipped; later records on the same partition still advance the offset.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kafka_bridge::kafka::{ConsumerSession, OffsetMarker};
//! use kafka_bridge::sink::Sink;
//!
//! # async fn run(sink: Arc<dyn Sink>, marker: Arc<dyn OffsetMarker>,
//! #              message: kafka_bridge::kafka::ConsumedMessage) {
//! let session = ConsumerSession::new(sink, marker);
//! let delivered = session.process(message).await;
//! # }
//! ```

use std::sync::{Arc, Weak};

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::context::{BridgeContext, Claim};
use super::dispatch::{ClaimQueue, ConsumerCommand, ConsumerCommandSender};
use super::message::ConsumedMessage;
use crate::error::BridgeError;
use crate::event::translate;
use crate::sink::Sink;

/// The consumer type used by the bridge
pub type BridgeConsumer = StreamConsumer<BridgeContext>;

/// Records that a message has been fully handled
///
/// Marking is the only way an offset becomes eligible for commit.
pub trait OffsetMarker: Send + Sync {
    /// Mark the record at `offset` as processed
    ///
    /// # Errors
    ///
    /// Returns the client error if the offset cannot be stored
    fn mark(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError>;
}

/// Marks offsets by storing them on the consumer for the next auto-commit
///
/// Holds a weak handle so outstanding markers never keep a closed consumer
/// alive.
pub struct StoreOffsetMarker {
    consumer: Weak<BridgeConsumer>,
}

impl StoreOffsetMarker {
    /// Create a marker for `consumer`
    pub fn new(consumer: &Arc<BridgeConsumer>) -> Self {
        Self {
            consumer: Arc::downgrade(consumer),
        }
    }
}

impl OffsetMarker for StoreOffsetMarker {
    fn mark(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError> {
        let consumer = self.consumer.upgrade().ok_or(KafkaError::Canceled)?;
        // The stored position is the next offset to read.
        consumer.store_offset(topic, partition, offset + 1)
    }
}

/// Consumption behaviour shared by all partition claims
pub struct ConsumerSession {
    sink: Arc<dyn Sink>,
    marker: Arc<dyn OffsetMarker>,
    include_payload: bool,
}

impl ConsumerSession {
    /// Create a session delivering to `sink` and marking through `marker`
    pub fn new(sink: Arc<dyn Sink>, marker: Arc<dyn OffsetMarker>) -> Self {
        Self {
            sink,
            marker,
            include_payload: false,
        }
    }

    /// Log delivered payloads at debug level
    pub fn with_payload_logging(mut self, include_payload: bool) -> Self {
        self.include_payload = include_payload;
        self
    }

    /// Called when partitions are assigned to this member
    ///
    /// The sink already exists, so this only records the new claims.
    pub fn setup(&self, claims: &[Claim]) -> Result<(), BridgeError> {
        for (topic, partition) in claims {
            info!(topic = %topic, partition = *partition, "Claimed partition");
        }
        Ok(())
    }

    /// Called when partitions are revoked from this member
    ///
    /// The sink outlives the session and is not touched.
    pub fn cleanup(&self, claims: &[Claim]) {
        for (topic, partition) in claims {
            info!(topic = %topic, partition = *partition, "Released partition");
        }
    }

    /// Handle one record: translate, deliver, and mark on success
    ///
    /// # Returns
    ///
    /// Returns `true` if the sink acknowledged the event
    pub async fn process(&self, message: ConsumedMessage) -> bool {
        let span = crate::record_span!(message);
        async {
            let envelope = translate(&message);

            if self.include_payload {
                debug!(
                    event_id = %envelope.id,
                    payload = %envelope.data.preview(),
                    "Delivering event"
                );
            }

            match self.sink.send(&envelope).await {
                Ok(()) => {
                    if let Err(e) = self
                        .marker
                        .mark(&message.topic, message.partition, message.offset)
                    {
                        warn!(error = %e, "Failed to store offset");
                    }
                    true
                }
                Err(e) => {
                    warn!(
                        event_id = %envelope.id,
                        error = %e,
                        "Failed to deliver event, offset not marked"
                    );
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Drive one partition claim until it is revoked or its queue closes
    ///
    /// Records are handled one at a time in arrival order. Cancellation is
    /// observed between records, so an in-flight delivery always completes.
    /// When the queue drains below the resume threshold of a paused
    /// partition, a resume command is sent back to the dispatcher.
    pub async fn consume_claim(
        &self,
        claim: Claim,
        mut messages: mpsc::UnboundedReceiver<ConsumedMessage>,
        queue: Arc<ClaimQueue>,
        commands: ConsumerCommandSender,
        cancel: CancellationToken,
    ) {
        debug!(topic = %claim.0, partition = claim.1, "Claim started");

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = messages.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            self.process(message).await;

            if queue.record_processed() {
                debug!(topic = %claim.0, partition = claim.1, "Claim drained, resuming");
                if commands.send(ConsumerCommand::Resume(claim.clone())).is_err() {
                    break;
                }
            }
        }

        debug!(topic = %claim.0, partition = claim.1, "Claim stopped");
    }
}
