//! Broker configuration management.

use std::env;

use crate::error::EventError;

/// Default name of the main event topic.
pub const DEFAULT_EVENTS_TOPIC: &str = "patient.events";

/// Default name of the dead-letter topic.
pub const DEFAULT_DEAD_LETTER_TOPIC: &str = "patient.events.dlq";

/// Default upper bound on a serialized record value, in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_000_000;

/// Kafka connection and topic configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Comma-separated list of broker addresses.
    pub brokers: String,
    /// Client identifier.
    pub client_id: String,
    /// Consumer group id. Only the consumer role needs one.
    pub group_id: Option<String>,
    /// Main event topic.
    pub events_topic: String,
    /// Dead-letter topic.
    pub dead_letter_topic: String,
    /// Maximum serialized record value size in bytes.
    pub max_message_bytes: usize,
}

impl BrokerConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `KAFKA_BROKERS`: comma-separated broker list
    /// - `KAFKA_CLIENT_ID`: client identifier
    ///
    /// Optional:
    /// - `KAFKA_GROUP_ID`: consumer group (required only by consumers)
    /// - `KAFKA_TOPIC_PATIENT_EVENTS`: main topic (default: "patient.events")
    /// - `KAFKA_TOPIC_DLQ`: dead-letter topic (default: "patient.events.dlq")
    /// - `KAFKA_MAX_MESSAGE_BYTES`: record size limit (default: 1000000)
    pub fn from_env() -> Result<Self, EventError> {
        let brokers = env::var("KAFKA_BROKERS").map_err(|_| EventError::ConfigMissing {
            var: "KAFKA_BROKERS".to_string(),
        })?;

        let client_id = env::var("KAFKA_CLIENT_ID").map_err(|_| EventError::ConfigMissing {
            var: "KAFKA_CLIENT_ID".to_string(),
        })?;

        let group_id = env::var("KAFKA_GROUP_ID").ok();

        let events_topic = env::var("KAFKA_TOPIC_PATIENT_EVENTS")
            .unwrap_or_else(|_| DEFAULT_EVENTS_TOPIC.to_string());

        let dead_letter_topic =
            env::var("KAFKA_TOPIC_DLQ").unwrap_or_else(|_| DEFAULT_DEAD_LETTER_TOPIC.to_string());

        let max_message_bytes = match env::var("KAFKA_MAX_MESSAGE_BYTES") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(EventError::ConfigInvalid {
                        var: "KAFKA_MAX_MESSAGE_BYTES".to_string(),
                        reason: format!("must be a positive integer, got '{raw}'"),
                    })
                }
            },
            Err(_) => DEFAULT_MAX_MESSAGE_BYTES,
        };

        let config = Self {
            brokers,
            client_id,
            group_id,
            events_topic,
            dead_letter_topic,
            max_message_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::new()
    }

    /// Broker addresses, trimmed, empty entries dropped.
    pub fn broker_list(&self) -> Vec<&str> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn validate(&self) -> Result<(), EventError> {
        if self.broker_list().is_empty() {
            return Err(EventError::ConfigInvalid {
                var: "KAFKA_BROKERS".to_string(),
                reason: "must include at least one broker".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`BrokerConfig`].
#[derive(Debug, Default)]
pub struct BrokerConfigBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    group_id: Option<String>,
    events_topic: Option<String>,
    dead_letter_topic: Option<String>,
    max_message_bytes: Option<usize>,
}

impl BrokerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn group_id(mut self, id: impl Into<String>) -> Self {
        self.group_id = Some(id.into());
        self
    }

    pub fn events_topic(mut self, topic: impl Into<String>) -> Self {
        self.events_topic = Some(topic.into());
        self
    }

    pub fn dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = Some(max);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<BrokerConfig, EventError> {
        let brokers = self.brokers.ok_or(EventError::ConfigMissing {
            var: "brokers".to_string(),
        })?;

        let client_id = self.client_id.ok_or(EventError::ConfigMissing {
            var: "client_id".to_string(),
        })?;

        let max_message_bytes = self.max_message_bytes.unwrap_or(DEFAULT_MAX_MESSAGE_BYTES);
        if max_message_bytes == 0 {
            return Err(EventError::ConfigInvalid {
                var: "max_message_bytes".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let config = BrokerConfig {
            brokers,
            client_id,
            group_id: self.group_id,
            events_topic: self
                .events_topic
                .unwrap_or_else(|| DEFAULT_EVENTS_TOPIC.to_string()),
            dead_letter_topic: self
                .dead_letter_topic
                .unwrap_or_else(|| DEFAULT_DEAD_LETTER_TOPIC.to_string()),
            max_message_bytes,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = BrokerConfig::builder()
            .brokers("localhost:9092")
            .client_id("triage-test")
            .build()
            .unwrap();

        assert_eq!(config.events_topic, "patient.events");
        assert_eq!(config.dead_letter_topic, "patient.events.dlq");
        assert_eq!(config.max_message_bytes, 1_000_000);
        assert!(config.group_id.is_none());
    }

    #[test]
    fn test_builder_missing_brokers() {
        let result = BrokerConfig::builder().client_id("c").build();
        assert!(matches!(result, Err(EventError::ConfigMissing { var }) if var == "brokers"));
    }

    #[test]
    fn test_builder_rejects_blank_broker_list() {
        let result = BrokerConfig::builder()
            .brokers(" , ,")
            .client_id("c")
            .build();
        assert!(matches!(result, Err(EventError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_builder_rejects_zero_max_bytes() {
        let result = BrokerConfig::builder()
            .brokers("localhost:9092")
            .client_id("c")
            .max_message_bytes(0)
            .build();
        assert!(matches!(result, Err(EventError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_broker_list_trims_entries() {
        let config = BrokerConfig::builder()
            .brokers("kafka-1:9092, kafka-2:9092 ,")
            .client_id("c")
            .build()
            .unwrap();
        assert_eq!(config.broker_list(), vec!["kafka-1:9092", "kafka-2:9092"]);
    }

    #[test]
    fn test_from_env_missing_brokers() {
        env::remove_var("KAFKA_BROKERS");
        let result = BrokerConfig::from_env();
        assert!(matches!(result, Err(EventError::ConfigMissing { var }) if var == "KAFKA_BROKERS"));
    }
}
