//! Dead-letter quarantine for messages that cannot be delivered.
//!
//! A dead-letter record preserves the original payload untouched next to the
//! failure that stranded it. It is written exactly once per failing message
//! and is never itself retried; a failure while writing one propagates to
//! the caller, aborting the enclosing publish call or batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EventError;
use crate::record::{RecordProducer, TopicRecord};

/// The failure that stranded a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Wire form of a quarantined message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    /// The payload exactly as it was when processing gave up: the parsed
    /// event for publish/index exhaustion, the raw string for parse failures.
    pub original_payload: serde_json::Value,
    pub error: FailureDetail,
}

impl DeadLetterRecord {
    pub fn new(original_payload: serde_json::Value, error_message: impl Into<String>) -> Self {
        Self {
            original_payload,
            error: FailureDetail {
                message: error_message.into(),
                occurred_at: Utc::now(),
            },
        }
    }
}

/// Routes failed payloads to the dead-letter topic, once each.
pub struct DeadLetterRouter<P> {
    producer: Arc<P>,
    topic: String,
    source: String,
}

impl<P: RecordProducer> DeadLetterRouter<P> {
    pub fn new(producer: Arc<P>, topic: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
            source: source.into(),
        }
    }

    /// Single-attempt send of a dead-letter record.
    ///
    /// No retry and no fallback destination: a send failure here surfaces
    /// as [`EventError::DeadLetterFailed`] to the caller.
    pub async fn route(
        &self,
        key: Option<String>,
        original_payload: serde_json::Value,
        error_message: &str,
    ) -> Result<(), EventError> {
        let record = DeadLetterRecord::new(original_payload, error_message);
        let payload =
            serde_json::to_vec(&record).map_err(|e| EventError::SerializationFailed {
                cause: e.to_string(),
            })?;

        let wire = TopicRecord::new(self.topic.clone(), key, self.source.clone(), payload);
        self.producer
            .send(&wire)
            .await
            .map_err(|e| EventError::DeadLetterFailed {
                topic: self.topic.clone(),
                cause: e.to_string(),
            })?;

        warn!(
            topic = %self.topic,
            source = %self.source,
            error = %error_message,
            "message routed to dead-letter topic"
        );
        Ok(())
    }
}
