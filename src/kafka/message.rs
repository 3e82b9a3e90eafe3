//! Owned copy of a consumed Kafka record.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rdkafka::message::{BorrowedMessage, Message};

/// One Kafka record, detached from the consumer buffer.
///
/// Owned by a single partition task for one processing attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedMessage {
    /// Topic the record was read from.
    pub topic: String,

    /// Partition within the topic.
    pub partition: i32,

    /// Offset within the partition.
    pub offset: i64,

    /// Record key, if any.
    pub key: Option<Bytes>,

    /// Record value; empty when the record has no payload.
    pub value: Bytes,

    /// Broker or producer timestamp, if the record carries one.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConsumedMessage {
    /// (topic, partition) pair identifying the claim this record belongs to.
    pub fn claim(&self) -> (String, i32) {
        (self.topic.clone(), self.partition)
    }
}

impl<'a> From<&BorrowedMessage<'a>> for ConsumedMessage {
    fn from(message: &BorrowedMessage<'a>) -> Self {
        let timestamp = message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(Bytes::copy_from_slice),
            value: message
                .payload()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            timestamp,
        }
    }
}
