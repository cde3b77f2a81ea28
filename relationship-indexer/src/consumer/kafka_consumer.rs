//! Kafka consumer implementation for the relationship indexer.
//!
//! Delivers ordered single-partition batches from the relationship topic.
//! Start offsets are always chosen by the processor: auto commit is off and
//! every group assignment is forwarded to the consume loop so the processor
//! can seek before any message of the new assignment is applied.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer},
    error::{KafkaError, KafkaResult},
    message::Message as KafkaMessage,
    ClientContext, Offset, TopicPartitionList,
};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::KafkaSettings;
use crate::consumer::broker::{BrokerClient, BrokerEvent, MessageBatch, RawMessage};
use crate::errors::IngestError;

/// Timeout for metadata, watermark and seek requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type AssignmentQueue = Arc<Mutex<VecDeque<Vec<i32>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Consumer context forwarding group assignments to the consume loop.
struct GroupContext {
    topic: String,
    assignments: AssignmentQueue,
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions: Vec<i32> = tpl
                    .elements()
                    .iter()
                    .filter(|elem| elem.topic() == self.topic)
                    .map(|elem| elem.partition())
                    .collect();
                info!(topic = %self.topic, partitions = ?partitions, "Partitions assigned");
                lock(&self.assignments).push_back(partitions);
            }
            Rebalance::Revoke(tpl) => {
                info!(topic = %self.topic, count = tpl.count(), "Partitions revoked");
            }
            Rebalance::Error(e) => {
                error!(topic = %self.topic, error = %e, "Rebalance error");
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(error = %e, "Offset commit failed");
        }
    }
}

/// A message received while a different batch was being built.
struct PendingMessage {
    partition: i32,
    message: RawMessage,
}

/// Where a received message goes while a batch is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intake {
    /// Append to the open batch, or open one with it.
    Take,
    /// Close the open batch and keep the message for the next delivery.
    Stash,
}

/// `open` is the partition of the batch being built, `None` before its first
/// message. A waiting assignment pre-empts delivery: the processor has to seek
/// before anything else from the broker is applied.
fn intake(open: Option<i32>, incoming: &PendingMessage, assignment_waiting: bool) -> Intake {
    if assignment_waiting {
        return Intake::Stash;
    }
    match open {
        Some(partition) if partition != incoming.partition => Intake::Stash,
        _ => Intake::Take,
    }
}

/// Drop the stashed message if it belongs to `partition`.
fn discard_stashed(pending: &mut Option<PendingMessage>, partition: i32) -> bool {
    if pending.as_ref().is_some_and(|p| p.partition == partition) {
        *pending = None;
        true
    } else {
        false
    }
}

/// Kafka consumer for relationship events.
pub struct KafkaConsumer {
    consumer: StreamConsumer<GroupContext>,
    topic: String,
    batch_size: usize,
    batch_timeout: Duration,
    assignments: AssignmentQueue,
    pending: Mutex<Option<PendingMessage>>,
    pending_fatal: Mutex<Option<String>>,
}

impl KafkaConsumer {
    /// Create a new Kafka consumer.
    ///
    /// # Arguments
    ///
    /// * `settings` - Brokers, topic, group, credentials and batch limits
    ///
    /// # Returns
    ///
    /// * `Ok(KafkaConsumer)` - A new consumer instance
    /// * `Err(IngestError)` - If consumer creation fails
    pub fn new(settings: &KafkaSettings) -> Result<Self, IngestError> {
        let assignments: AssignmentQueue = Arc::new(Mutex::new(VecDeque::new()));
        let context = GroupContext {
            topic: settings.topic.clone(),
            assignments: Arc::clone(&assignments),
        };

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "30000")
            .set("max.poll.interval.ms", "300000");

        // Configure SASL authentication if credentials are provided
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);

            if let Some(ca_pem) = &settings.ssl_ca_pem {
                client_config.set("ssl.ca.pem", ca_pem);
            }
        }

        let consumer: StreamConsumer<GroupContext> = client_config
            .create_with_context(context)
            .map_err(|e| IngestError::kafka(e.to_string()))?;

        info!(
            brokers = %settings.brokers,
            topic = %settings.topic,
            group_id = %settings.group_id,
            batch_size = settings.batch_size,
            batch_timeout_ms = settings.batch_timeout.as_millis() as u64,
            "Created Kafka consumer with batching"
        );

        Ok(Self {
            consumer,
            topic: settings.topic.clone(),
            batch_size: settings.batch_size,
            batch_timeout: settings.batch_timeout,
            assignments,
            pending: Mutex::new(None),
            pending_fatal: Mutex::new(None),
        })
    }

    fn take_assignment(&self) -> Option<Vec<i32>> {
        lock(&self.assignments).pop_front()
    }

    fn assignment_waiting(&self) -> bool {
        !lock(&self.assignments).is_empty()
    }

    fn stash(&self, pending: PendingMessage) {
        *lock(&self.pending) = Some(pending);
    }

    fn to_pending(msg: &rdkafka::message::BorrowedMessage<'_>) -> PendingMessage {
        PendingMessage {
            partition: msg.partition(),
            message: RawMessage {
                offset: msg.offset(),
                payload: msg.payload().map(|p| p.to_vec()),
            },
        }
    }

    fn seek_to(&self, partition: i32, offset: Offset) -> Result<(), IngestError> {
        if discard_stashed(&mut lock(&self.pending), partition) {
            debug!(partition = partition, "Dropped message stashed before seek");
        }

        self.consumer
            .seek(&self.topic, partition, offset, REQUEST_TIMEOUT)?;

        info!(topic = %self.topic, partition = partition, offset = ?offset, "Seeked partition");
        Ok(())
    }

    /// Wait for the first message of the next batch.
    async fn first_message(&self) -> Result<PendingMessage, BrokerEvent> {
        loop {
            match timeout(self.batch_timeout, self.consumer.recv()).await {
                Err(_) => {
                    if let Some(partitions) = self.take_assignment() {
                        return Err(BrokerEvent::Assigned(partitions));
                    }
                }
                Ok(Ok(msg)) => return Ok(Self::to_pending(&msg)),
                Ok(Err(KafkaError::MessageConsumptionFatal(code))) => {
                    return Err(BrokerEvent::Fatal(code.to_string()));
                }
                Ok(Err(e)) => {
                    warn!(topic = %self.topic, error = %e, "Kafka consumption error, skipping");
                }
            }
        }
    }
}

#[async_trait]
impl BrokerClient for KafkaConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch_earliest_offsets(&self) -> Result<HashMap<i32, i64>, IngestError> {
        tokio::task::block_in_place(|| {
            let metadata = self
                .consumer
                .fetch_metadata(Some(&self.topic), REQUEST_TIMEOUT)?;

            let mut earliest = HashMap::new();
            for topic in metadata.topics().iter().filter(|t| t.name() == self.topic) {
                for partition in topic.partitions() {
                    let (low, _high) =
                        self.consumer
                            .fetch_watermarks(&self.topic, partition.id(), REQUEST_TIMEOUT)?;
                    earliest.insert(partition.id(), low);
                }
            }

            Ok(earliest)
        })
    }

    async fn subscribe(&self) -> Result<(), IngestError> {
        self.consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| IngestError::kafka(e.to_string()))?;

        info!(topic = %self.topic, "Subscribed to Kafka topic");
        Ok(())
    }

    #[instrument(skip(self), fields(topic = %self.topic))]
    async fn next_event(&self) -> BrokerEvent {
        if let Some(partitions) = self.take_assignment() {
            return BrokerEvent::Assigned(partitions);
        }
        if let Some(reason) = lock(&self.pending_fatal).take() {
            return BrokerEvent::Fatal(reason);
        }

        let stashed = lock(&self.pending).take();
        let first = match stashed {
            Some(pending) => pending,
            None => match self.first_message().await {
                Ok(pending) => pending,
                Err(event) => return event,
            },
        };

        // Anything received after an assignment predates the processor's seek.
        if intake(None, &first, self.assignment_waiting()) == Intake::Stash {
            self.stash(first);
            return self
                .take_assignment()
                .map(BrokerEvent::Assigned)
                .unwrap_or(BrokerEvent::End);
        }

        let partition = first.partition;
        let mut messages = Vec::with_capacity(self.batch_size);
        messages.push(first.message);
        let deadline = Instant::now() + self.batch_timeout;

        while messages.len() < self.batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match timeout(remaining, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(msg)) => {
                    let pending = Self::to_pending(&msg);
                    match intake(Some(partition), &pending, self.assignment_waiting()) {
                        Intake::Take => messages.push(pending.message),
                        Intake::Stash => {
                            self.stash(pending);
                            break;
                        }
                    }
                }
                Ok(Err(KafkaError::MessageConsumptionFatal(code))) => {
                    *lock(&self.pending_fatal) = Some(code.to_string());
                    break;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Kafka consumption error, skipping");
                }
            }
        }

        debug!(
            partition = partition,
            message_count = messages.len(),
            "Delivering batch"
        );

        BrokerEvent::Batch(MessageBatch {
            topic: self.topic.clone(),
            partition,
            messages,
        })
    }

    async fn seek(&self, partition: i32, offset: i64) -> Result<(), IngestError> {
        self.seek_to(partition, Offset::Offset(offset))
    }

    async fn seek_to_beginning(&self, partition: i32) -> Result<(), IngestError> {
        self.seek_to(partition, Offset::Beginning)
    }

    async fn acknowledge(&self, partition: i32, offset: i64) -> Result<(), IngestError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), IngestError> {
        // librdkafka heartbeats from its background thread.
        debug!(topic = %self.topic, "Heartbeat");
        Ok(())
    }

    async fn stop(&self) -> Result<(), IngestError> {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(partition: i32, offset: i64) -> PendingMessage {
        PendingMessage {
            partition,
            message: RawMessage::new(offset, r#"{"type":"register"}"#),
        }
    }

    #[test]
    fn test_same_partition_extends_batch() {
        assert_eq!(intake(None, &pending(0, 1), false), Intake::Take);
        assert_eq!(intake(Some(0), &pending(0, 2), false), Intake::Take);
    }

    #[test]
    fn test_other_partition_closes_batch() {
        assert_eq!(intake(Some(0), &pending(1, 7), false), Intake::Stash);
    }

    #[test]
    fn test_waiting_assignment_preempts_delivery() {
        assert_eq!(intake(None, &pending(0, 1), true), Intake::Stash);
        assert_eq!(intake(Some(0), &pending(0, 2), true), Intake::Stash);
    }

    #[test]
    fn test_seek_discards_stash_of_same_partition() {
        let mut stash = Some(pending(2, 40));

        assert!(!discard_stashed(&mut stash, 1));
        assert!(stash.is_some());

        assert!(discard_stashed(&mut stash, 2));
        assert!(stash.is_none());
        assert!(!discard_stashed(&mut stash, 2));
    }
}
