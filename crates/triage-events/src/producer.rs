//! Publish path: validate, size-gate, send with bounded retry, dead-letter
//! on exhaustion.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::BrokerConfig;
use crate::dead_letter::DeadLetterRouter;
use crate::error::EventError;
use crate::event::PatientEvent;
use crate::record::{RecordProducer, TopicRecord};
use crate::retry::RetryPolicy;
use crate::validate::validate_event;

/// Publishes validated patient events to the main topic.
///
/// Generic over the send transport so the retry/dead-letter policy is
/// testable without a broker; production wiring supplies the Kafka
/// transport from `BrokerConnection` (behind the `kafka` feature).
pub struct EventPublisher<P> {
    producer: Arc<P>,
    dead_letter: DeadLetterRouter<P>,
    retry: RetryPolicy,
    events_topic: String,
    max_message_bytes: usize,
    source: String,
}

impl<P: RecordProducer> EventPublisher<P> {
    pub fn new(producer: Arc<P>, config: &BrokerConfig, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            dead_letter: DeadLetterRouter::new(
                Arc::clone(&producer),
                config.dead_letter_topic.clone(),
                source.clone(),
            ),
            producer,
            retry: RetryPolicy::default(),
            events_topic: config.events_topic.clone(),
            max_message_bytes: config.max_message_bytes,
            source,
        }
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate and publish a candidate event.
    ///
    /// A malformed event fails fast and never touches the broker; an
    /// oversize event is rejected locally with no dead-letter entry. A send
    /// that exhausts its retries is written once to the dead-letter topic
    /// and the original publish error is still surfaced to the caller, so
    /// exactly one of {main topic, dead-letter topic} receives the message
    /// per call.
    #[instrument(skip(self, body), fields(topic = %self.events_topic, source = %self.source))]
    pub async fn publish(&self, body: &serde_json::Value) -> Result<PatientEvent, EventError> {
        let event = validate_event(body)?;

        let payload = event.to_json_bytes()?;
        if payload.len() > self.max_message_bytes {
            return Err(EventError::Oversize {
                size: payload.len(),
                max: self.max_message_bytes,
            });
        }

        let record = TopicRecord::new(
            self.events_topic.clone(),
            Some(event.patient_id.clone()),
            self.source.clone(),
            payload,
        );

        debug!(
            key = %event.patient_id,
            event_type = event.event_type.as_str(),
            payload_size = record.payload_len(),
            "publishing event"
        );

        match self.retry.run("publish", || self.producer.send(&record)).await {
            Ok(()) => Ok(event),
            Err(publish_error) => {
                let original = serde_json::to_value(&event).map_err(|e| {
                    EventError::SerializationFailed {
                        cause: e.to_string(),
                    }
                })?;
                self.dead_letter
                    .route(
                        Some(event.patient_id.clone()),
                        original,
                        &publish_error.to_string(),
                    )
                    .await?;
                Err(publish_error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::DeadLetterRecord;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Transport that fails the first `failures` sends to the events topic.
    /// Dead-letter sends can be failed independently.
    struct ScriptedProducer {
        sent: Mutex<Vec<TopicRecord>>,
        event_failures: AtomicU32,
        fail_dead_letter: bool,
    }

    impl ScriptedProducer {
        fn new(event_failures: u32, fail_dead_letter: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                event_failures: AtomicU32::new(event_failures),
                fail_dead_letter,
            })
        }

        fn sent_to(&self, topic: &str) -> Vec<TopicRecord> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.topic == topic)
                .cloned()
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl RecordProducer for ScriptedProducer {
        async fn send(&self, record: &TopicRecord) -> Result<(), EventError> {
            if record.topic == "patient.events.dlq" {
                if self.fail_dead_letter {
                    return Err(EventError::PublishFailed {
                        topic: record.topic.clone(),
                        cause: "dlq down".to_string(),
                    });
                }
            } else if self
                .event_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EventError::PublishFailed {
                    topic: record.topic.clone(),
                    cause: "broker unavailable".to_string(),
                });
            }
            self.sent.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn publisher(producer: Arc<ScriptedProducer>) -> EventPublisher<ScriptedProducer> {
        let config = BrokerConfig::builder()
            .brokers("localhost:9092")
            .client_id("test")
            .build()
            .unwrap();
        EventPublisher::new(producer, &config, "ingest-api")
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    fn valid_body() -> serde_json::Value {
        json!({
            "patientId": "P-9",
            "eventType": "admission",
            "severity": "critical",
            "department": "er",
            "data": {"bed": "A3"},
            "timestamp": "2026-03-01T08:30:00Z"
        })
    }

    #[tokio::test]
    async fn test_publish_success() {
        let producer = ScriptedProducer::new(0, false);
        let event = publisher(Arc::clone(&producer))
            .publish(&valid_body())
            .await
            .unwrap();

        assert_eq!(event.patient_id, "P-9");
        let main = producer.sent_to("patient.events");
        assert_eq!(main.len(), 1);
        assert_eq!(main[0].key.as_deref(), Some("P-9"));
        assert_eq!(main[0].headers[0].1, "ingest-api");
        assert!(producer.sent_to("patient.events.dlq").is_empty());

        let published = PatientEvent::from_json_bytes(&main[0].payload).unwrap();
        assert_eq!(published, event);
    }

    #[tokio::test]
    async fn test_validation_failure_never_touches_broker() {
        let producer = ScriptedProducer::new(0, false);
        let err = publisher(Arc::clone(&producer))
            .publish(&json!({"patientId": ""}))
            .await
            .unwrap_err();

        assert!(matches!(err, EventError::Validation(_)));
        assert!(producer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversize_rejected_before_broker_and_dead_letter() {
        let producer = ScriptedProducer::new(0, false);
        let config = BrokerConfig::builder()
            .brokers("localhost:9092")
            .client_id("test")
            .max_message_bytes(64)
            .build()
            .unwrap();
        let publisher = EventPublisher::new(Arc::clone(&producer), &config, "ingest-api");

        let err = publisher.publish(&valid_body()).await.unwrap_err();
        assert!(matches!(err, EventError::Oversize { max: 64, .. }));
        assert!(producer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_retry_budget() {
        let producer = ScriptedProducer::new(2, false);
        publisher(Arc::clone(&producer))
            .publish(&valid_body())
            .await
            .unwrap();

        assert_eq!(producer.sent_to("patient.events").len(), 1);
        assert!(producer.sent_to("patient.events.dlq").is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_dead_letters_once_and_reraises() {
        let producer = ScriptedProducer::new(u32::MAX, false);
        let err = publisher(Arc::clone(&producer))
            .publish(&valid_body())
            .await
            .unwrap_err();

        assert!(matches!(err, EventError::PublishFailed { .. }));
        assert!(producer.sent_to("patient.events").is_empty());

        let dead = producer.sent_to("patient.events.dlq");
        assert_eq!(dead.len(), 1);
        let record: DeadLetterRecord = serde_json::from_slice(&dead[0].payload).unwrap();
        assert_eq!(record.original_payload["patientId"], "P-9");
        assert!(record.error.message.contains("broker unavailable"));
    }

    #[tokio::test]
    async fn test_dead_letter_send_failure_propagates() {
        let producer = ScriptedProducer::new(u32::MAX, true);
        let err = publisher(producer).publish(&valid_body()).await.unwrap_err();
        assert!(matches!(err, EventError::DeadLetterFailed { .. }));
    }
}
