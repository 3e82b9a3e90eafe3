//! Consumer context forwarding librdkafka callbacks to async tasks
//!
//! librdkafka invokes these callbacks from its own threads. Nothing here
//! blocks: rebalances and client errors are pushed onto unbounded channels
//! and handled by the dispatcher and the error drain.

use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::{ClientContext, TopicPartitionList};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A (topic, partition) pair owned by this group member
pub type Claim = (String, i32);

/// Partition ownership changes reported by the group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions newly assigned to this member
    Assigned(Vec<Claim>),
    /// Partitions about to be taken away from this member
    Revoked(Vec<Claim>),
}

/// Asynchronous client error together with librdkafka's reason text
#[derive(Debug, Clone)]
pub struct ClientError {
    /// Error reported by the client
    pub error: KafkaError,
    /// Human readable reason
    pub reason: String,
}

/// Sender half of the client error channel
pub type ClientErrorSender = mpsc::UnboundedSender<ClientError>;
/// Receiver half of the client error channel
pub type ClientErrorReceiver = mpsc::UnboundedReceiver<ClientError>;

/// Context installed on the bridge consumer
pub struct BridgeContext {
    errors: ClientErrorSender,
    rebalances: mpsc::UnboundedSender<RebalanceEvent>,
}

impl BridgeContext {
    /// Create a context reporting into the given channels
    pub fn new(
        errors: ClientErrorSender,
        rebalances: mpsc::UnboundedSender<RebalanceEvent>,
    ) -> Self {
        Self { errors, rebalances }
    }
}

pub(crate) fn claims(partitions: &TopicPartitionList) -> Vec<Claim> {
    partitions
        .elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

impl ClientContext for BridgeContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!(facility = fac, "librdkafka: {}", log_message),
            RDKafkaLogLevel::Warning => warn!(facility = fac, "librdkafka: {}", log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(facility = fac, "librdkafka: {}", log_message)
            }
            RDKafkaLogLevel::Debug => debug!(facility = fac, "librdkafka: {}", log_message),
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let event = ClientError {
            error,
            reason: reason.to_string(),
        };
        if let Err(e) = self.errors.send(event) {
            error!(
                error = %e.0.error,
                reason = %e.0.reason,
                "Kafka client error (error drain closed)"
            );
        }
    }
}

impl ConsumerContext for BridgeContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Rebalance::Revoke(partitions) = rebalance {
            if partitions.count() == 0 {
                debug!("Skipping empty revoke rebalance");
                return;
            }
            info!(partitions = partitions.count(), "Revoking partitions");
            if let Err(e) = self.rebalances.send(RebalanceEvent::Revoked(claims(partitions))) {
                error!("Failed to forward revoke event: {}", e);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty assign rebalance");
                    return;
                }
                info!(partitions = partitions.count(), "Assigned partitions");
                if let Err(e) = self
                    .rebalances
                    .send(RebalanceEvent::Assigned(claims(partitions)))
                {
                    error!("Failed to forward assign event: {}", e);
                }
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => {
                error!("Rebalance error: {}", e);
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "Committed offsets"),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => warn!(error = %e, "Offset commit failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::Offset;

    #[test]
    fn test_claims_from_partition_list() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("orders", 0);
        tpl.add_partition("orders", 2);
        tpl.add_partition_offset("payments", 1, Offset::Beginning)
            .unwrap();

        assert_eq!(
            claims(&tpl),
            vec![
                ("orders".to_string(), 0),
                ("orders".to_string(), 2),
                ("payments".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_client_errors_are_forwarded() {
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let (rebalance_tx, _rebalance_rx) = mpsc::unbounded_channel();
        let context = BridgeContext::new(error_tx, rebalance_tx);

        context.error(KafkaError::Canceled, "broker transport failure");

        let forwarded = error_rx.try_recv().unwrap();
        assert_eq!(forwarded.error, KafkaError::Canceled);
        assert_eq!(forwarded.reason, "broker transport failure");
    }

    #[test]
    fn test_error_with_closed_drain_does_not_panic() {
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (rebalance_tx, _rebalance_rx) = mpsc::unbounded_channel();
        drop(error_rx);

        let context = BridgeContext::new(error_tx, rebalance_tx);
        context.error(KafkaError::Canceled, "late error");
    }
}
