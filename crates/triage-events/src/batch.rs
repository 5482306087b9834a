//! Batch consumption state machine with manual offset discipline.
//!
//! Messages inside a batch are processed strictly sequentially: message
//! *n+1* is never started before message *n* reaches a terminal outcome
//! (indexed or dead-lettered), and the offset is committed only after that
//! outcome. Parallelism lives across partitions, not inside a batch.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dead_letter::DeadLetterRouter;
use crate::error::EventError;
use crate::event::PatientEvent;
use crate::record::RecordProducer;
use crate::retry::RetryPolicy;

/// A raw message as fetched from one partition of the events topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Broker-side helpers the batch loop drives: assignment liveness, batch
/// staleness, offset marking, commit, and group heartbeat.
///
/// Keeping these behind a trait lets the state machine run against a fake
/// context in tests, with the Kafka-backed implementation supplied by
/// `EventConsumer` (behind the `kafka` feature).
#[async_trait]
pub trait BatchContext: Send {
    /// Whether this consumer still owns its assignment and should keep going.
    fn is_live(&self) -> bool;

    /// Whether the fetched batch was invalidated, e.g. by a rebalance.
    fn is_stale(&self) -> bool;

    /// Record a message as processed so its offset can be committed.
    fn mark_processed(&mut self, message: &RawMessage);

    /// Flush marked offsets to the broker.
    async fn commit(&mut self) -> Result<(), EventError>;

    /// Signal liveness to the group coordinator.
    async fn heartbeat(&mut self) -> Result<(), EventError>;
}

/// Terminal write target for parsed events.
///
/// Must tolerate duplicate writes of the same event: under at-least-once
/// delivery a crash between sink write and offset commit causes redelivery.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write(&self, event: &PatientEvent) -> Result<(), EventError>;
}

#[async_trait]
impl<T> EventSink for std::sync::Arc<T>
where
    T: EventSink + ?Sized,
{
    async fn write(&self, event: &PatientEvent) -> Result<(), EventError> {
        (**self).write(event).await
    }
}

/// Outcome counts for one processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub indexed: usize,
    pub dead_lettered: usize,
    /// Messages left unprocessed because the liveness gate closed; their
    /// offsets stay uncommitted and the broker redelivers them.
    pub remaining: usize,
}

/// Drains batches of raw messages into the sink, quarantining failures.
pub struct BatchProcessor<S, P> {
    sink: S,
    dead_letter: DeadLetterRouter<P>,
    retry: RetryPolicy,
}

impl<S: EventSink, P: RecordProducer> BatchProcessor<S, P> {
    pub fn new(sink: S, dead_letter: DeadLetterRouter<P>, retry: RetryPolicy) -> Self {
        Self {
            sink,
            dead_letter,
            retry,
        }
    }

    /// Process one batch to terminal outcomes, committing after each message.
    ///
    /// Every message that passes the liveness gate ends in exactly one of
    /// {sink write succeeded, dead-letter record written}, and its offset is
    /// committed exactly once, strictly after that outcome. A dead-letter
    /// send failure aborts the batch with the current message uncommitted.
    pub async fn process_batch<C: BatchContext>(
        &self,
        batch: &[RawMessage],
        ctx: &mut C,
    ) -> Result<BatchOutcome, EventError> {
        let mut outcome = BatchOutcome::default();

        for (index, message) in batch.iter().enumerate() {
            if !ctx.is_live() || ctx.is_stale() {
                outcome.remaining = batch.len() - index;
                warn!(
                    remaining = outcome.remaining,
                    "assignment lost mid-batch; leaving remainder uncommitted"
                );
                break;
            }

            self.process_message(message, &mut outcome).await?;

            ctx.mark_processed(message);
            ctx.commit().await?;
            ctx.heartbeat().await?;
        }

        Ok(outcome)
    }

    async fn process_message(
        &self,
        message: &RawMessage,
        outcome: &mut BatchOutcome,
    ) -> Result<(), EventError> {
        let event = match PatientEvent::from_json_bytes(&message.payload) {
            Ok(event) => event,
            Err(parse_error) => {
                // A payload that does not parse will not parse on redelivery
                // either: quarantine the raw bytes without a sink attempt.
                let raw = String::from_utf8_lossy(&message.payload).into_owned();
                self.dead_letter
                    .route(message.key.clone(), Value::String(raw), &parse_error.to_string())
                    .await?;
                outcome.dead_lettered += 1;
                return Ok(());
            }
        };

        match self.retry.run("index", || self.sink.write(&event)).await {
            Ok(()) => {
                debug!(
                    partition = message.partition,
                    offset = message.offset,
                    patient_id = %event.patient_id,
                    "event indexed"
                );
                outcome.indexed += 1;
            }
            Err(sink_error) => {
                let original =
                    serde_json::to_value(&event).map_err(|e| EventError::SerializationFailed {
                        cause: e.to_string(),
                    })?;
                self.dead_letter
                    .route(
                        Some(event.patient_id.clone()),
                        original,
                        &sink_error.to_string(),
                    )
                    .await?;
                outcome.dead_lettered += 1;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, Severity};
    use crate::record::TopicRecord;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct RecordingProducer {
        sent: Mutex<Vec<TopicRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl RecordProducer for RecordingProducer {
        async fn send(&self, record: &TopicRecord) -> Result<(), EventError> {
            if self.fail {
                return Err(EventError::PublishFailed {
                    topic: record.topic.clone(),
                    cause: "dlq down".to_string(),
                });
            }
            self.sent.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    /// Sink that fails the first `failures` writes, then succeeds.
    struct FlakySink {
        written: Mutex<Vec<String>>,
        attempts: AtomicU32,
        failures: u32,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                written: Mutex::new(Vec::new()),
                attempts: AtomicU32::new(0),
                failures,
            }
        }
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn write(&self, event: &PatientEvent) -> Result<(), EventError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(EventError::SinkFailed {
                    cause: format!("write attempt {attempt} refused"),
                });
            }
            self.written.lock().unwrap().push(event.patient_id.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeContext {
        live: bool,
        stale_after: Option<usize>,
        marked: Vec<(i32, i64)>,
        commits: usize,
        heartbeats: usize,
    }

    impl FakeContext {
        fn live() -> Self {
            Self {
                live: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl BatchContext for FakeContext {
        fn is_live(&self) -> bool {
            self.live
        }

        fn is_stale(&self) -> bool {
            self.stale_after
                .is_some_and(|after| self.marked.len() >= after)
        }

        fn mark_processed(&mut self, message: &RawMessage) {
            self.marked.push((message.partition, message.offset));
        }

        async fn commit(&mut self) -> Result<(), EventError> {
            self.commits += 1;
            Ok(())
        }

        async fn heartbeat(&mut self) -> Result<(), EventError> {
            self.heartbeats += 1;
            Ok(())
        }
    }

    fn event_message(offset: i64, patient_id: &str) -> RawMessage {
        let event = PatientEvent {
            patient_id: patient_id.to_string(),
            event_type: EventType::Vitals,
            severity: Severity::Normal,
            department: "icu".to_string(),
            data: json!({"offset": offset}),
            timestamp: "2026-03-01T08:30:00Z".parse().unwrap(),
        };
        RawMessage {
            partition: 0,
            offset,
            key: Some(patient_id.to_string()),
            payload: event.to_json_bytes().unwrap(),
        }
    }

    fn garbage_message(offset: i64) -> RawMessage {
        RawMessage {
            partition: 0,
            offset,
            key: Some("P-raw".to_string()),
            payload: b"{not json".to_vec(),
        }
    }

    fn processor(
        sink_failures: u32,
        dead_letter_fails: bool,
    ) -> (
        BatchProcessor<FlakySink, RecordingProducer>,
        Arc<RecordingProducer>,
    ) {
        let producer = Arc::new(RecordingProducer {
            sent: Mutex::new(Vec::new()),
            fail: dead_letter_fails,
        });
        let router =
            DeadLetterRouter::new(Arc::clone(&producer), "patient.events.dlq", "indexer");
        let processor = BatchProcessor::new(
            FlakySink::new(sink_failures),
            router,
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        (processor, producer)
    }

    #[tokio::test]
    async fn test_batch_indexed_in_order_with_per_message_commits() {
        let (processor, producer) = processor(0, false);
        let batch = vec![
            event_message(10, "P-1"),
            event_message(11, "P-1"),
            event_message(12, "P-1"),
        ];
        let mut ctx = FakeContext::live();

        let outcome = processor.process_batch(&batch, &mut ctx).await.unwrap();

        assert_eq!(outcome.indexed, 3);
        assert_eq!(outcome.dead_lettered, 0);
        assert_eq!(ctx.marked, vec![(0, 10), (0, 11), (0, 12)]);
        assert_eq!(ctx.commits, 3);
        assert_eq!(ctx.heartbeats, 3);
        assert_eq!(
            *processor.sink.written.lock().unwrap(),
            vec!["P-1", "P-1", "P-1"]
        );
        assert!(producer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_recovers_within_retry_budget() {
        let (processor, producer) = processor(2, false);
        let batch = vec![event_message(5, "P-2")];
        let mut ctx = FakeContext::live();

        let outcome = processor.process_batch(&batch, &mut ctx).await.unwrap();

        assert_eq!(outcome.indexed, 1);
        assert_eq!(processor.sink.attempts.load(Ordering::SeqCst), 3);
        assert!(producer.sent.lock().unwrap().is_empty());
        assert_eq!(ctx.marked, vec![(0, 5)]);
    }

    #[tokio::test]
    async fn test_sink_exhaustion_dead_letters_and_advances() {
        let (processor, producer) = processor(u32::MAX, false);
        let batch = vec![event_message(5, "P-3")];
        let mut ctx = FakeContext::live();

        let outcome = processor.process_batch(&batch, &mut ctx).await.unwrap();

        assert_eq!(outcome.indexed, 0);
        assert_eq!(outcome.dead_lettered, 1);
        // Offset still advances: a poison message never blocks the partition.
        assert_eq!(ctx.marked, vec![(0, 5)]);
        assert_eq!(ctx.commits, 1);

        let sent = producer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let record: crate::dead_letter::DeadLetterRecord =
            serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(record.original_payload["patientId"], "P-3");
        assert!(record.error.message.contains("refused"));
    }

    #[tokio::test]
    async fn test_parse_failure_skips_sink_and_advances() {
        let (processor, producer) = processor(0, false);
        let batch = vec![garbage_message(7)];
        let mut ctx = FakeContext::live();

        let outcome = processor.process_batch(&batch, &mut ctx).await.unwrap();

        assert_eq!(outcome.dead_lettered, 1);
        assert_eq!(processor.sink.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.marked, vec![(0, 7)]);

        let sent = producer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let record: crate::dead_letter::DeadLetterRecord =
            serde_json::from_slice(&sent[0].payload).unwrap();
        // Raw bytes preserved verbatim for recovery.
        assert_eq!(record.original_payload, json!("{not json"));
    }

    #[tokio::test]
    async fn test_not_live_stops_without_committing() {
        let (processor, _) = processor(0, false);
        let batch = vec![event_message(1, "P-4"), event_message(2, "P-4")];
        let mut ctx = FakeContext::default(); // live = false

        let outcome = processor.process_batch(&batch, &mut ctx).await.unwrap();

        assert_eq!(outcome.remaining, 2);
        assert!(ctx.marked.is_empty());
        assert_eq!(ctx.commits, 0);
    }

    #[tokio::test]
    async fn test_staleness_stops_mid_batch() {
        let (processor, _) = processor(0, false);
        let batch = vec![
            event_message(1, "P-5"),
            event_message(2, "P-5"),
            event_message(3, "P-5"),
        ];
        let mut ctx = FakeContext {
            live: true,
            stale_after: Some(1),
            ..FakeContext::default()
        };

        let outcome = processor.process_batch(&batch, &mut ctx).await.unwrap();

        // First message committed; the rest stay uncommitted for redelivery.
        assert_eq!(outcome.indexed, 1);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(ctx.marked, vec![(0, 1)]);
        assert_eq!(ctx.commits, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_failure_aborts_batch_uncommitted() {
        let (processor, _) = processor(u32::MAX, true);
        let batch = vec![event_message(1, "P-6"), event_message(2, "P-6")];
        let mut ctx = FakeContext::live();

        let err = processor.process_batch(&batch, &mut ctx).await.unwrap_err();

        assert!(matches!(err, EventError::DeadLetterFailed { .. }));
        assert!(ctx.marked.is_empty());
        assert_eq!(ctx.commits, 0);
    }
}
