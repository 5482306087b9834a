//! Shared broker connection: one place that owns the rdkafka clients and
//! constructs per-role handles (publish transport, consumer, health).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::metadata::Metadata;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::info;

use crate::config::BrokerConfig;
use crate::consumer::EventConsumer;
use crate::error::EventError;
use crate::health::HealthStatus;
use crate::producer::EventPublisher;
use crate::record::{RecordProducer, TopicRecord};
use crate::retry::RetryPolicy;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// rdkafka-backed implementation of [`RecordProducer`].
///
/// Cheap to clone; all clones share the underlying librdkafka producer,
/// which tolerates concurrent use. Retry state stays with the caller.
#[derive(Clone)]
pub struct KafkaRecordProducer {
    producer: FutureProducer,
}

#[async_trait]
impl RecordProducer for KafkaRecordProducer {
    async fn send(&self, record: &TopicRecord) -> Result<(), EventError> {
        let mut headers = OwnedHeaders::new();
        for (name, value) in &record.headers {
            headers = headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let delivery = match record.key.as_deref() {
            Some(key) => {
                self.producer
                    .send(
                        FutureRecord::to(record.topic.as_str())
                            .key(key)
                            .payload(record.payload.as_slice())
                            .headers(headers),
                        SEND_TIMEOUT,
                    )
                    .await
            }
            None => {
                self.producer
                    .send(
                        FutureRecord::<str, _>::to(record.topic.as_str())
                            .payload(record.payload.as_slice())
                            .headers(headers),
                        SEND_TIMEOUT,
                    )
                    .await
            }
        };

        delivery
            .map(|_| ())
            .map_err(|(error, _)| EventError::PublishFailed {
                topic: record.topic.clone(),
                cause: error.to_string(),
            })
    }
}

/// Owns the broker sessions for the hosting process.
///
/// Connected once during startup with bounded retry, reused by every
/// publish, dead-letter, and health operation, torn down during graceful
/// shutdown. No other component holds broker handles directly.
pub struct BrokerConnection {
    config: BrokerConfig,
    producer: FutureProducer,
}

impl BrokerConnection {
    /// Connect to the cluster, proving reachability with a metadata query
    /// under the default bounded retry. Exhaustion is fatal to startup.
    pub async fn connect(config: BrokerConfig) -> Result<Self, EventError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| EventError::ConnectionFailed {
                brokers: config.brokers.clone(),
                cause: e.to_string(),
            })?;

        let connection = Self { config, producer };

        RetryPolicy::default()
            .run("connect", || async {
                connection.fetch_metadata().map(|_| ())
            })
            .await?;

        info!(
            brokers = %connection.config.brokers,
            client_id = %connection.config.client_id,
            "broker connection established"
        );
        Ok(connection)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Cloneable publish-side transport handle.
    pub fn record_producer(&self) -> KafkaRecordProducer {
        KafkaRecordProducer {
            producer: self.producer.clone(),
        }
    }

    /// Publisher for the given source role (e.g. "ingest-api").
    pub fn publisher(&self, source: &str) -> EventPublisher<KafkaRecordProducer> {
        EventPublisher::new(Arc::new(self.record_producer()), &self.config, source)
    }

    /// Consumer for the configured group; requires `group_id` to be set.
    pub fn consumer(&self) -> Result<EventConsumer, EventError> {
        EventConsumer::new(&self.config)
    }

    /// Topology query against the configured event topic.
    ///
    /// Success implies the cluster is reachable, not that it is healthy.
    pub async fn health_check(&self) -> Result<HealthStatus, EventError> {
        let metadata = self.fetch_metadata()?;
        Ok(HealthStatus {
            reachable: true,
            brokers: metadata.brokers().len(),
            topics: metadata.topics().len(),
        })
    }

    fn fetch_metadata(&self) -> Result<Metadata, EventError> {
        self.producer
            .client()
            .fetch_metadata(Some(&self.config.events_topic), METADATA_TIMEOUT)
            .map_err(|e| EventError::ConnectionFailed {
                brokers: self.config.brokers.clone(),
                cause: e.to_string(),
            })
    }

    /// Flush buffered records before the process exits.
    pub fn shutdown(&self) {
        if let Err(e) = self.producer.flush(FLUSH_TIMEOUT) {
            tracing::warn!(error = %e, "producer flush failed during shutdown");
        }
        info!("broker connection closed");
    }
}
