//! Processor module for the relationship indexer.
//!
//! Drives the consume loop: hydrates the graph at startup, seeks every
//! assigned partition to its start offset, applies batches to the graph and
//! persists the outcome before checkpointing the partition.

mod metrics;

pub use metrics::{spawn_reporter, MetricsSnapshot, ProcessorMetrics};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::consumer::{BrokerClient, BrokerEvent, MessageBatch};
use crate::errors::IngestError;
use crate::graph::GraphEngine;
use crate::loader::GraphLoader;
use relationship_indexer_shared::{ConnectionEvent, SequencedEvent, StoredEvent};

/// Runtime options of the processor.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Resume from stored checkpoints instead of the earliest retained offset.
    pub resume: bool,
    pub metrics_interval: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            resume: false,
            metrics_interval: Duration::from_secs(5),
        }
    }
}

/// Outcome of one batch, mostly useful for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub examined: usize,
    pub applied: usize,
    pub highest_seen: Option<i64>,
    pub highest_applied: Option<i64>,
    /// Offset written to the checkpoint store, if any.
    pub checkpointed: Option<i64>,
}

/// First offset to consume on an assigned partition.
///
/// With resume enabled and a checkpoint present this is the offset right
/// after the checkpoint, but never below the earliest retained offset.
/// Otherwise consumption starts at the earliest retained offset.
pub fn resolve_start_offset(resume: bool, checkpoint: Option<i64>, earliest: i64) -> i64 {
    match (resume, checkpoint) {
        (true, Some(offset)) => (offset + 1).max(earliest),
        _ => earliest,
    }
}

/// The stream processor. The only mutator of its graph.
pub struct Processor {
    broker: Arc<dyn BrokerClient>,
    loader: GraphLoader,
    graph: GraphEngine,
    options: ProcessorOptions,
    metrics: Arc<ProcessorMetrics>,
    earliest_offsets: HashMap<i32, i64>,
}

impl Processor {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        loader: GraphLoader,
        graph: GraphEngine,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            broker,
            loader,
            graph,
            options,
            metrics: Arc::new(ProcessorMetrics::new()),
            earliest_offsets: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &GraphEngine {
        &self.graph
    }

    pub fn metrics(&self) -> Arc<ProcessorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until the broker ends, a fatal error occurs or `shutdown` turns true.
    ///
    /// A fatal consumer error is returned as `Err` after the regular shutdown
    /// sequence so that the binary can exit non-zero.
    #[instrument(skip(self, shutdown), fields(topic = %self.broker.topic()))]
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        info!("Starting relationship processor");

        if let Err(e) = self.start().await {
            error!(error = %e, "Processor startup failed");
            self.stop().await;
            return Err(e);
        }

        let reporter = spawn_reporter(Arc::clone(&self.metrics), self.options.metrics_interval);
        let broker = Arc::clone(&self.broker);

        info!("Ready to process events from Kafka");

        let result = loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal");
                break Ok(());
            }

            let event = tokio::select! {
                event = broker.next_event() => event,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed");
                        break Ok(());
                    }
                    continue;
                }
            };

            match event {
                BrokerEvent::Assigned(partitions) => self.handle_assignment(&partitions).await,
                BrokerEvent::Batch(batch) => {
                    self.handle_batch(batch, &shutdown).await;
                }
                BrokerEvent::Fatal(reason) => {
                    error!(reason = %reason, "Fatal Kafka consumer error");
                    break Err(IngestError::fatal(reason));
                }
                BrokerEvent::End => {
                    info!("Broker stream ended");
                    break Ok(());
                }
            }
        };

        reporter.abort();
        self.stop().await;

        result
    }

    async fn start(&mut self) -> Result<(), IngestError> {
        let users = self.loader.load_users().await?;
        let user_count = users.len();
        self.graph.hydrate(users);
        info!(user_count = user_count, "Graph hydrated from persisted users");

        self.earliest_offsets = self.broker.fetch_earliest_offsets().await?;
        let mut partitions: Vec<_> = self.earliest_offsets.iter().collect();
        partitions.sort();
        for (partition, offset) in partitions {
            info!(partition = *partition, earliest_offset = *offset, "Earliest retained offset");
        }

        self.broker.subscribe().await?;
        Ok(())
    }

    /// Seek every newly assigned partition to its start offset.
    pub async fn handle_assignment(&mut self, partitions: &[i32]) {
        let topic = self.broker.topic().to_string();

        for &partition in partitions {
            let Some(earliest) = self.earliest_offset(partition).await else {
                warn!(
                    partition = partition,
                    "Earliest offset unknown, rewinding partition to the beginning"
                );
                if let Err(e) = self.broker.seek_to_beginning(partition).await {
                    error!(partition = partition, error = %e, "Failed to rewind partition");
                }
                continue;
            };

            let checkpoint = if self.options.resume {
                match self.loader.checkpoint(&topic, partition).await {
                    Ok(checkpoint) => checkpoint,
                    Err(e) => {
                        warn!(
                            partition = partition,
                            error = %e,
                            "Checkpoint lookup failed, starting from earliest offset"
                        );
                        None
                    }
                }
            } else {
                None
            };

            let start = resolve_start_offset(self.options.resume, checkpoint, earliest);
            info!(
                partition = partition,
                checkpoint = ?checkpoint,
                earliest_offset = earliest,
                start_offset = start,
                "Assigning start offset"
            );

            if let Err(e) = self.broker.seek(partition, start).await {
                error!(partition = partition, offset = start, error = %e, "Failed to seek partition");
            }
        }
    }

    /// Earliest retained offset of `partition`, refreshing the cached
    /// watermarks once when the partition is not known yet.
    async fn earliest_offset(&mut self, partition: i32) -> Option<i64> {
        if let Some(offset) = self.earliest_offsets.get(&partition) {
            return Some(*offset);
        }

        match self.broker.fetch_earliest_offsets().await {
            Ok(offsets) => self.earliest_offsets.extend(offsets),
            Err(e) => warn!(partition = partition, error = %e, "Failed to refresh earliest offsets"),
        }
        self.earliest_offsets.get(&partition).copied()
    }

    /// Apply one partition's ordered slice and persist the result.
    ///
    /// Stops early once `shutdown` turns true. Messages that were not examined
    /// are neither acknowledged nor checkpointed.
    pub async fn handle_batch(
        &mut self,
        batch: MessageBatch,
        shutdown: &watch::Receiver<bool>,
    ) -> BatchOutcome {
        self.metrics.record_batch();

        let mut outcome = BatchOutcome::default();
        let mut events: Vec<StoredEvent> = Vec::with_capacity(batch.messages.len());

        for message in &batch.messages {
            if *shutdown.borrow() {
                info!(
                    partition = batch.partition,
                    offset = message.offset,
                    "Shutdown requested, leaving the rest of the batch"
                );
                break;
            }

            let offset = message.offset;
            outcome.examined += 1;
            outcome.highest_seen = outcome.highest_seen.max(Some(offset));
            self.metrics.observe_offset(offset);

            let Some(payload) = message.payload() else {
                debug!(partition = batch.partition, offset = offset, "Skipping empty message");
                continue;
            };

            let raw: serde_json::Value = match serde_json::from_slice(payload) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        partition = batch.partition,
                        offset = offset,
                        error = %e,
                        "Failed to parse message"
                    );
                    continue;
                }
            };

            let event: ConnectionEvent = match serde_json::from_value(raw.clone()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        partition = batch.partition,
                        offset = offset,
                        error = %e,
                        "Malformed relationship event"
                    );
                    continue;
                }
            };

            let event_type = event.event_type();
            let type_name = raw
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or(event.type_name())
                .to_string();

            events.push(StoredEvent {
                topic: batch.topic.clone(),
                partition: batch.partition,
                offset,
                seq: offset,
                event_type: type_name,
                event_timestamp: event.event_timestamp(),
                ingested_at: Utc::now(),
                payload: raw,
            });

            let result = self.graph.ingest(&SequencedEvent::new(offset, event));
            if result.applied {
                if let Some(event_type) = event_type {
                    self.metrics.record_applied(event_type);
                }
                outcome.applied += 1;
                outcome.highest_applied = outcome.highest_applied.max(Some(offset));
            }
        }

        let Some(highest_seen) = outcome.highest_seen else {
            return outcome;
        };

        // Failures below are logged by the loader. None of them stops the stream,
        // but any of them holds the checkpoint so the batch is read again.
        let stored = self.loader.store_events(&events).await.is_ok();

        if let Err(e) = self.broker.heartbeat().await {
            warn!(partition = batch.partition, error = %e, "Heartbeat failed");
        }

        let dirty = self.graph.drain_dirty_nodes();
        let flushed = self.loader.flush_users(&dirty).await.is_ok();

        if flushed && stored {
            let offset = outcome.highest_applied.unwrap_or(highest_seen);
            if self
                .loader
                .save_checkpoint(&batch.topic, batch.partition, offset)
                .await
                .is_ok()
            {
                outcome.checkpointed = Some(offset);
            }
        } else if !flushed {
            self.graph.mark_dirty(dirty.iter().map(|user| user.name.as_str()));
            warn!(
                partition = batch.partition,
                requeued = dirty.len(),
                "User flush failed, keeping users dirty and holding the checkpoint"
            );
        } else {
            warn!(
                partition = batch.partition,
                events = events.len(),
                "Raw event append failed, holding the checkpoint"
            );
        }

        if let Err(e) = self.broker.acknowledge(batch.partition, highest_seen).await {
            warn!(partition = batch.partition, offset = highest_seen, error = %e, "Failed to acknowledge offset");
        }

        debug!(
            partition = batch.partition,
            examined = outcome.examined,
            applied = outcome.applied,
            dirty_users = dirty.len(),
            checkpoint = ?outcome.checkpointed,
            "Batch processed"
        );

        outcome
    }

    async fn stop(&mut self) {
        let s = self.metrics.snapshot();

        if let Err(e) = self.broker.stop().await {
            error!(error = %e, "Error stopping Kafka consumer");
        }
        self.loader.close().await;

        info!(
            applied_total = s.applied_total,
            batches = s.batches,
            latest_offset = s.latest_offset,
            register = s.register,
            referral = s.referral,
            addfriend = s.addfriend,
            unfriend = s.unfriend,
            "Processor shutdown complete"
        );
    }
}
