//! Group-consume loop
//!
//! The [`PartitionDispatcher`] owns the receive side of the consumer. Each
//! record is routed to the task of its (topic, partition) claim, so records
//! of one partition are handled strictly in order while partitions proceed
//! independently. A claim whose queue grows past the high watermark is paused
//! on the consumer and resumed once its task has drained half of it.
//!
//! Claims exist only between an assignment and its revocation. A revoked
//! claim's task is awaited before the dispatcher moves on, so a later
//! assignment of the same partition never runs beside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rdkafka::consumer::Consumer;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::TopicPartitionList;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::{Claim, ClientError, ClientErrorSender, RebalanceEvent};
use super::message::ConsumedMessage;
use super::session::{BridgeConsumer, ConsumerSession};
use crate::error::BridgeError;

/// Commands sent from claim tasks back to the dispatcher
#[derive(Debug)]
pub enum ConsumerCommand {
    /// Resume fetching for a paused claim
    Resume(Claim),
}

/// Sender for consumer commands, held by claim tasks
pub type ConsumerCommandSender = mpsc::UnboundedSender<ConsumerCommand>;
/// Receiver for consumer commands, held by the dispatcher
pub type ConsumerCommandReceiver = mpsc::UnboundedReceiver<ConsumerCommand>;

/// Backpressure bookkeeping for one claim
///
/// The dispatcher counts records in, the claim task counts them out.
#[derive(Debug)]
pub struct ClaimQueue {
    depth: AtomicUsize,
    paused: AtomicBool,
    high_watermark: usize,
}

impl ClaimQueue {
    /// Create bookkeeping that pauses above `high_watermark` queued records
    pub fn new(high_watermark: usize) -> Self {
        Self {
            depth: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            high_watermark: high_watermark.max(1),
        }
    }

    /// Count one record routed to the claim
    ///
    /// Returns `true` exactly when the claim crosses the high watermark and
    /// must be paused.
    pub fn record_enqueued(&self) -> bool {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        depth > self.high_watermark && !self.paused.swap(true, Ordering::AcqRel)
    }

    /// Count one record finished by the claim task
    ///
    /// Returns `true` exactly when a paused claim has drained to half the
    /// watermark and must be resumed.
    pub fn record_processed(&self) -> bool {
        let depth = self
            .depth
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        depth <= self.resume_threshold() && self.paused.swap(false, Ordering::AcqRel)
    }

    /// Records routed but not yet finished
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Whether the claim is currently paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn resume_threshold(&self) -> usize {
        self.high_watermark / 2
    }
}

struct ClaimWorker {
    sender: mpsc::UnboundedSender<ConsumedMessage>,
    queue: Arc<ClaimQueue>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Routes records from the consumer to per-partition claim tasks
pub struct PartitionDispatcher {
    consumer: Arc<BridgeConsumer>,
    session: Arc<ConsumerSession>,
    high_watermark: usize,
    errors: ClientErrorSender,
    workers: HashMap<Claim, ClaimWorker>,
    command_tx: ConsumerCommandSender,
    command_rx: ConsumerCommandReceiver,
}

impl PartitionDispatcher {
    /// Create a dispatcher for a subscribed consumer
    ///
    /// # Arguments
    ///
    /// * `consumer` - Subscribed consumer
    /// * `session` - Behaviour shared by every claim
    /// * `high_watermark` - Queued records per claim before it is paused
    /// * `errors` - Where recoverable consume errors are reported
    pub fn new(
        consumer: Arc<BridgeConsumer>,
        session: Arc<ConsumerSession>,
        high_watermark: usize,
        errors: ClientErrorSender,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            consumer,
            session,
            high_watermark,
            errors,
            workers: HashMap::new(),
            command_tx,
            command_rx,
        }
    }

    /// Run the group-consume loop until `shutdown` fires or a fatal error occurs
    ///
    /// On exit every claim is cancelled and awaited, so no delivery is left
    /// in flight when this returns.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Consume` for a fatal client error
    pub async fn run(
        mut self,
        mut rebalances: mpsc::UnboundedReceiver<RebalanceEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), BridgeError> {
        info!("Consume loop started");

        let consumer = self.consumer.clone();
        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                Some(command) = self.command_rx.recv() => self.handle_command(command),
                Some(event) = rebalances.recv() => self.handle_rebalance(event).await,
                received = consumer.recv() => match received {
                    Ok(message) => {
                        let message = ConsumedMessage::from(&message);
                        self.dispatch(message);
                    }
                    Err(e) if is_fatal(&e) => {
                        error!(error = %e, "Fatal consumer error");
                        break Err(BridgeError::Consume(e));
                    }
                    Err(e) => {
                        let event = ClientError {
                            error: e,
                            reason: "consume".to_string(),
                        };
                        if let Err(e) = self.errors.send(event) {
                            error!(error = %e.0.error, "Consume error (error drain closed)");
                        }
                    }
                },
            }
        };

        self.stop_all().await;
        info!("Consume loop stopped");
        result
    }

    fn dispatch(&mut self, message: ConsumedMessage) {
        let claim = message.claim();
        let Some(worker) = self.workers.get(&claim) else {
            debug!(
                topic = %claim.0,
                partition = claim.1,
                offset = message.offset,
                "Record for unassigned partition, dropping"
            );
            return;
        };

        let pause = worker.queue.record_enqueued();
        if worker.sender.send(message).is_err() {
            warn!(topic = %claim.0, partition = claim.1, "Claim task gone, dropping record");
            worker.queue.record_processed();
            return;
        }

        if pause {
            debug!(
                topic = %claim.0,
                partition = claim.1,
                depth = worker.queue.depth(),
                "Claim over high watermark, pausing"
            );
            if let Err(e) = self.consumer.pause(&claim_list(&claim)) {
                warn!(topic = %claim.0, partition = claim.1, error = %e, "Failed to pause partition");
            }
        }
    }

    fn handle_command(&mut self, command: ConsumerCommand) {
        match command {
            ConsumerCommand::Resume(claim) => {
                if !self.workers.contains_key(&claim) {
                    return;
                }
                if let Err(e) = self.consumer.resume(&claim_list(&claim)) {
                    warn!(topic = %claim.0, partition = claim.1, error = %e, "Failed to resume partition");
                }
            }
        }
    }

    async fn handle_rebalance(&mut self, event: RebalanceEvent) {
        match event {
            RebalanceEvent::Assigned(claims) => {
                if let Err(e) = self.session.setup(&claims) {
                    error!(error = %e, "Session setup failed");
                }
                for claim in claims {
                    if !self.workers.contains_key(&claim) {
                        self.start_claim(claim);
                    }
                }
            }
            RebalanceEvent::Revoked(claims) => {
                let revoked: Vec<ClaimWorker> = claims
                    .iter()
                    .filter_map(|claim| self.workers.remove(claim))
                    .collect();
                stop_workers(revoked).await;
                self.session.cleanup(&claims);
            }
        }
    }

    fn start_claim(&mut self, claim: Claim) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(ClaimQueue::new(self.high_watermark));
        let cancel = CancellationToken::new();

        let session = self.session.clone();
        let handle = tokio::spawn({
            let claim = claim.clone();
            let queue = queue.clone();
            let commands = self.command_tx.clone();
            let cancel = cancel.clone();
            async move {
                session
                    .consume_claim(claim, receiver, queue, commands, cancel)
                    .await;
            }
        });

        self.workers.insert(
            claim,
            ClaimWorker {
                sender,
                queue,
                cancel,
                handle,
            },
        );
    }

    async fn stop_all(&mut self) {
        let workers: Vec<ClaimWorker> = self.workers.drain().map(|(_, w)| w).collect();
        stop_workers(workers).await;
    }
}

/// Cancel claim tasks and wait for their in-flight deliveries to finish
async fn stop_workers(workers: Vec<ClaimWorker>) {
    for worker in &workers {
        worker.cancel.cancel();
    }
    for worker in workers {
        drop(worker.sender);
        if let Err(e) = worker.handle.await {
            error!(error = %e, "Claim task failed");
        }
    }
}

fn claim_list(claim: &Claim) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(&claim.0, claim.1);
    tpl
}

/// Whether a consume error ends the consume loop
pub fn is_fatal(error: &KafkaError) -> bool {
    error.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal)
}
