//! The running bridge
//!
//! The [`Adapter`] owns the configuration and the sink. [`Adapter::start`]
//! builds the consumer group and runs it until the shutdown token fires or
//! the consume loop hits a fatal error.
//!
//! # Example
//!
//! ```rust,no_run
//! use kafka_bridge::{Adapter, AdapterConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AdapterConfig::default();
//!     let adapter = Adapter::new(config)?;
//!
//!     let shutdown = CancellationToken::new();
//!     adapter.start(shutdown).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use rdkafka::consumer::{CommitMode, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AdapterConfig;
use crate::error::BridgeError;
use crate::kafka::context::ClientErrorReceiver;
use crate::kafka::{
    build_client_config, verification_strategy, BridgeConsumer, BridgeContext, ConsumerSession,
    PartitionDispatcher, StoreOffsetMarker,
};
use crate::security::SecurityContext;
use crate::sink::{HttpSink, Sink};

/// Kafka to HTTP bridge
pub struct Adapter {
    config: AdapterConfig,
    sink: Arc<dyn Sink>,
}

impl Adapter {
    /// Create an adapter delivering to the configured HTTP sink
    ///
    /// The sink is built here, once, before any consumption starts.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Sink` if the sink URI is invalid or the HTTP
    /// client cannot be built
    pub fn new(config: AdapterConfig) -> Result<Self, BridgeError> {
        let sink = HttpSink::from_config(&config)?;
        Ok(Self::with_sink(config, Arc::new(sink)))
    }

    /// Create an adapter delivering to an arbitrary sink
    pub fn with_sink(config: AdapterConfig, sink: Arc<dyn Sink>) -> Self {
        Self { config, sink }
    }

    /// Configuration this adapter runs with
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Parsed TLS material, present only when TLS is enabled and a client
    /// certificate is configured
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Certificate` if the client certificate or key is
    /// unusable
    pub fn security_context(&self) -> Result<Option<SecurityContext>, BridgeError> {
        if !self.config.wants_client_certificate() {
            return Ok(None);
        }

        let tls = &self.config.net.tls;
        let context = SecurityContext::build(
            &tls.cert,
            &tls.key,
            &tls.ca_cert,
            verification_strategy(&self.config),
        )?;
        Ok(Some(context))
    }

    /// Run the bridge until `shutdown` is cancelled
    ///
    /// Creates the consumer group, subscribes to the topic set, and runs the
    /// error drain and the consume loop. On shutdown the loop is stopped,
    /// stored offsets are committed synchronously, and the consumer is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS material is unusable, the client cannot be
    /// created, the subscription fails, or the consume loop hits a fatal error
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        let topics = self.config.topic_list();
        info!(
            brokers = %self.config.broker_list().join(","),
            topics = %topics.join(","),
            group_id = %self.config.consumer_group,
            sink = %self.config.sink_uri,
            "Starting bridge"
        );

        let client_config = {
            let security = self.security_context()?;
            build_client_config(&self.config, security.as_ref())?
        };

        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
        let context = BridgeContext::new(error_tx.clone(), rebalance_tx);

        let consumer: BridgeConsumer = client_config
            .create_with_context(context)
            .map_err(BridgeError::Client)?;
        let consumer = Arc::new(consumer);

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(BridgeError::Subscribe)?;

        let drain = tokio::spawn(drain_errors(error_rx));

        let marker = Arc::new(StoreOffsetMarker::new(&consumer));
        let session = Arc::new(
            ConsumerSession::new(self.sink.clone(), marker)
                .with_payload_logging(self.config.logging.include_payload),
        );
        let dispatcher = PartitionDispatcher::new(
            consumer.clone(),
            session,
            self.config.consumer.partition_queue_high_watermark,
            error_tx,
        );

        let stop_loop = shutdown.child_token();
        let mut consume = tokio::spawn(dispatcher.run(rebalance_rx, stop_loop.clone()));

        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutting down");
                stop_loop.cancel();
                join_consume_loop(consume.await)
            }
            joined = &mut consume => join_consume_loop(joined),
        };

        commit_stored_offsets(&consumer);
        drain.abort();
        drop(consumer);

        info!("Bridge stopped");
        result
    }
}

fn join_consume_loop(
    joined: Result<Result<(), BridgeError>, tokio::task::JoinError>,
) -> Result<(), BridgeError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(BridgeError::Task(format!("consume loop failed: {}", e))),
    }
}

fn commit_stored_offsets(consumer: &BridgeConsumer) {
    match consumer.commit_consumer_state(CommitMode::Sync) {
        Ok(()) => debug!("Committed stored offsets"),
        Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {
            debug!("No stored offsets to commit")
        }
        Err(e) => warn!(error = %e, "Final offset commit failed"),
    }
}

async fn drain_errors(mut errors: ClientErrorReceiver) {
    while let Some(event) = errors.recv().await {
        error!(error = %event.error, reason = %event.reason, "Kafka client error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::ClientError;
    use crate::security::VerificationStrategy;
    use crate::test_utils::{generate_ca, generate_leaf, RecordingSink};

    fn config() -> AdapterConfig {
        AdapterConfig {
            topics: "orders".to_string(),
            sink_uri: "http://sink.default.svc/".to_string(),
            ..AdapterConfig::default()
        }
    }

    #[test]
    fn test_new_builds_http_sink() {
        assert!(Adapter::new(config()).is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_sink_uri() {
        let mut config = config();
        config.sink_uri = "not a uri".to_string();
        assert!(matches!(Adapter::new(config), Err(BridgeError::Sink(_))));
    }

    #[test]
    fn test_no_security_context_without_tls() {
        let adapter = Adapter::with_sink(config(), Arc::new(RecordingSink::new()));
        assert!(adapter.security_context().unwrap().is_none());
    }

    #[test]
    fn test_no_security_context_with_tls_but_no_cert() {
        let mut config = config();
        config.net.tls.enable = true;
        let adapter = Adapter::with_sink(config, Arc::new(RecordingSink::new()));
        assert!(adapter.security_context().unwrap().is_none());
    }

    #[test]
    fn test_security_context_with_client_certificate() {
        let ca = generate_ca("bridge-test-ca");
        let leaf = generate_leaf(&ca, "bridge-client", &[]);

        let mut config = config();
        config.net.tls.enable = true;
        config.net.tls.cert = leaf.cert_pem.clone();
        config.net.tls.key = leaf.key_pem.clone();
        config.net.tls.ca_cert = ca.cert_pem.clone();

        let adapter = Adapter::with_sink(config, Arc::new(RecordingSink::new()));
        let context = adapter.security_context().unwrap().unwrap();
        assert_eq!(context.strategy(), VerificationStrategy::ChainOnly);
        assert_eq!(context.ca_pool_len(), 1);
    }

    #[tokio::test]
    async fn test_start_fails_on_bad_client_certificate() {
        let mut config = config();
        config.net.tls.enable = true;
        config.net.tls.cert = "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n".to_string();
        config.net.tls.key = "garbage".to_string();

        let adapter = Adapter::with_sink(config, Arc::new(RecordingSink::new()));
        let result = adapter.start(CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::Certificate(_))));
    }

    #[tokio::test]
    async fn test_start_fails_on_invalid_client_property() {
        let mut config = config();
        config.consumer.session_timeout_ms = 0;

        let adapter = Adapter::with_sink(config, Arc::new(RecordingSink::new()));
        let result = adapter.start(CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::Client(_))));
    }

    #[tokio::test]
    async fn test_start_returns_after_shutdown() {
        let mut config = config();
        config.bootstrap_servers = "127.0.0.1:1".to_string();

        let adapter = Adapter::with_sink(config, Arc::new(RecordingSink::new()));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            adapter.start(shutdown),
        )
        .await
        .expect("start did not return after shutdown");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_drain_errors_ends_when_senders_drop() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ClientError {
            error: KafkaError::Canceled,
            reason: "test".to_string(),
        })
        .unwrap();
        drop(tx);

        drain_errors(rx).await;
    }
}
