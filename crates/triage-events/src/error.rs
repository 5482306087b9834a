//! Error types for the triage-events crate.

use thiserror::Error;

use crate::validate::ValidationError;

/// Errors that can occur along the event delivery pipeline.
#[derive(Debug, Error)]
pub enum EventError {
    // Configuration errors (permanent, no retry)
    /// Required configuration variable is missing.
    #[error("configuration missing: {var}")]
    ConfigMissing { var: String },

    /// Configuration value is invalid.
    #[error("configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    // Local rejections (permanent, never reach the broker)
    /// The candidate event failed schema validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The serialized event exceeds the configured record size limit.
    #[error("event message size {size} exceeds max {max}")]
    Oversize { size: usize, max: usize },

    /// Failed to serialize an event or record payload.
    #[error("failed to serialize payload: {cause}")]
    SerializationFailed { cause: String },

    // Broker errors (transient, retried with backoff)
    /// Failed to connect to the broker cluster.
    #[error("connection to broker {brokers} failed: {cause}")]
    ConnectionFailed { brokers: String, cause: String },

    /// Failed to publish a record to a topic.
    #[error("failed to publish to topic {topic}: {cause}")]
    PublishFailed { topic: String, cause: String },

    /// Failed to consume from a topic or commit offsets.
    #[error("failed to consume from topic {topic}: {cause}")]
    ConsumeFailed { topic: String, cause: String },

    // Consumer-side failures
    /// A raw message payload could not be parsed into an event.
    #[error("failed to parse event payload: {cause}")]
    ParseFailed { cause: String },

    /// The index sink rejected a write.
    #[error("sink write failed: {cause}")]
    SinkFailed { cause: String },

    /// A dead-letter record could not be written. There is no fallback
    /// destination; this aborts the enclosing publish call or batch.
    #[error("failed to write dead-letter record to {topic}: {cause}")]
    DeadLetterFailed { topic: String, cause: String },

    // Internal Kafka errors
    /// Internal Kafka client error.
    #[cfg(feature = "kafka")]
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl EventError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventError::ConnectionFailed { .. }
                | EventError::PublishFailed { .. }
                | EventError::ConsumeFailed { .. }
                | EventError::SinkFailed { .. }
        )
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EventError::ConfigMissing { .. } | EventError::ConfigInvalid { .. }
        )
    }
}
