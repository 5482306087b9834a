//! Kafka consumer wiring for the indexer role.
//!
//! Auto-commit is disabled; offsets are committed one message at a time by
//! the batch state machine in [`crate::batch`], strictly after each message
//! reaches a terminal outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::message::Message;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchContext, BatchProcessor, EventSink, RawMessage};
use crate::config::BrokerConfig;
use crate::error::EventError;
use crate::record::RecordProducer;

const DEFAULT_MAX_BATCH_SIZE: usize = 64;
const DEFAULT_BATCH_WAIT: Duration = Duration::from_millis(250);

/// Consumer context that counts partition revocations, so a batch fetched
/// before a rebalance can be recognized as stale.
struct RebalanceEpoch {
    epoch: Arc<AtomicU64>,
}

impl ClientContext for RebalanceEpoch {}

impl ConsumerContext for RebalanceEpoch {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(partitions) = rebalance {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            warn!(
                partitions = partitions.count(),
                "partition assignment revoked"
            );
        }
    }
}

/// Kafka consumer that drains event batches through a [`BatchProcessor`].
pub struct EventConsumer {
    consumer: StreamConsumer<RebalanceEpoch>,
    epoch: Arc<AtomicU64>,
    topic: String,
    group_id: String,
    max_batch_size: usize,
    batch_wait: Duration,
}

impl EventConsumer {
    /// Create a consumer from the broker configuration.
    ///
    /// Fails with `ConfigMissing` if no consumer group is configured.
    pub fn new(config: &BrokerConfig) -> Result<Self, EventError> {
        let group_id = config
            .group_id
            .clone()
            .ok_or_else(|| EventError::ConfigMissing {
                var: "KAFKA_GROUP_ID".to_string(),
            })?;

        let epoch = Arc::new(AtomicU64::new(0));
        let context = RebalanceEpoch {
            epoch: Arc::clone(&epoch),
        };

        let consumer: StreamConsumer<RebalanceEpoch> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("group.id", &group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .create_with_context(context)
            .map_err(|e| EventError::ConnectionFailed {
                brokers: config.brokers.clone(),
                cause: e.to_string(),
            })?;

        info!(
            group_id = %group_id,
            brokers = %config.brokers,
            "event consumer created"
        );

        Ok(Self {
            consumer,
            epoch,
            topic: config.events_topic.clone(),
            group_id,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_wait: DEFAULT_BATCH_WAIT,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Consume until the shutdown flag flips.
    ///
    /// Each fetched batch runs through the processor with a fresh
    /// [`BatchContext`]; a batch-level failure (e.g. a dead-letter send
    /// error) is logged and the uncommitted messages are redelivered.
    pub async fn run<S, P>(
        &self,
        processor: &BatchProcessor<S, P>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), EventError>
    where
        S: EventSink,
        P: RecordProducer,
    {
        self.consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| EventError::ConsumeFailed {
                topic: self.topic.clone(),
                cause: e.to_string(),
            })?;

        info!(topic = %self.topic, group_id = %self.group_id, "starting consumer loop");

        let mut shutdown_changed = shutdown.clone();
        while !*shutdown_changed.borrow() {
            // Captured before the fetch: a rebalance during or after the
            // fetch marks the whole batch stale.
            let batch_epoch = self.epoch.load(Ordering::SeqCst);

            let batch = tokio::select! {
                result = self.next_batch() => match result {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(error = %e, "error receiving batch");
                        continue;
                    }
                },
                _ = shutdown_changed.changed() => break,
            };

            let mut ctx = KafkaBatchContext {
                consumer: &self.consumer,
                topic: &self.topic,
                epoch: &self.epoch,
                batch_epoch,
                shutdown: &shutdown,
                pending: HashMap::new(),
            };

            match processor.process_batch(&batch, &mut ctx).await {
                Ok(outcome) => debug!(
                    indexed = outcome.indexed,
                    dead_lettered = outcome.dead_lettered,
                    remaining = outcome.remaining,
                    "batch complete"
                ),
                Err(e) => {
                    // Uncommitted messages will be redelivered.
                    error!(error = %e, "failed to process batch");
                }
            }
        }

        info!("consumer loop stopped");
        Ok(())
    }

    /// Wait for one message, then drain whatever else arrives within the
    /// batch window, up to the batch size limit.
    async fn next_batch(&self) -> Result<Vec<RawMessage>, EventError> {
        let first = self
            .consumer
            .recv()
            .await
            .map_err(|e| EventError::ConsumeFailed {
                topic: self.topic.clone(),
                cause: e.to_string(),
            })?;

        let mut batch = vec![raw_message(&first)];
        drop(first);
        let deadline = tokio::time::Instant::now() + self.batch_wait;

        while batch.len() < self.max_batch_size {
            match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(Ok(message)) => batch.push(raw_message(&message)),
                Ok(Err(e)) => {
                    warn!(error = %e, "error receiving message");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(batch)
    }
}

fn raw_message(message: &rdkafka::message::BorrowedMessage<'_>) -> RawMessage {
    RawMessage {
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        // An absent value becomes an empty payload, which fails parsing and
        // is quarantined like any other malformed message.
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

/// Kafka-backed [`BatchContext`]: offsets marked per message, committed
/// asynchronously via an explicit partition list.
struct KafkaBatchContext<'a> {
    consumer: &'a StreamConsumer<RebalanceEpoch>,
    topic: &'a str,
    epoch: &'a AtomicU64,
    batch_epoch: u64,
    shutdown: &'a watch::Receiver<bool>,
    /// partition -> next offset to commit.
    pending: HashMap<i32, i64>,
}

#[async_trait]
impl BatchContext for KafkaBatchContext<'_> {
    fn is_live(&self) -> bool {
        !*self.shutdown.borrow()
    }

    fn is_stale(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.batch_epoch
    }

    fn mark_processed(&mut self, message: &RawMessage) {
        self.pending.insert(message.partition, message.offset + 1);
    }

    async fn commit(&mut self) -> Result<(), EventError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut offsets = TopicPartitionList::new();
        for (&partition, &next_offset) in &self.pending {
            offsets
                .add_partition_offset(self.topic, partition, Offset::Offset(next_offset))
                .map_err(|e| EventError::ConsumeFailed {
                    topic: self.topic.to_string(),
                    cause: e.to_string(),
                })?;
        }

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| EventError::ConsumeFailed {
                topic: self.topic.to_string(),
                cause: e.to_string(),
            })?;

        self.pending.clear();
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<(), EventError> {
        // librdkafka owns the group session heartbeat on its background
        // thread; nothing further to signal from the batch loop.
        Ok(())
    }
}
