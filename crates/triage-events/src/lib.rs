//! # triage-events
//!
//! Event delivery pipeline for the triage platform.
//!
//! Validated patient events are published to a partitioned Kafka topic and
//! drained into a search sink with at-least-once delivery. Every event ends
//! in exactly one place: the sink, or the dead-letter topic with its failure
//! context — never silently dropped.
//!
//! ## Guarantees
//!
//! - **Per-patient ordering**: `patientId` is the partition key, so events
//!   for one patient are consumed in publish order. No ordering across
//!   patients.
//! - **At-least-once**: offsets are committed only after a message reaches
//!   a terminal outcome (indexed or dead-lettered). Redelivery after a
//!   crash can duplicate sink writes; the sink must tolerate that.
//! - **Bounded failure handling**: publish and index attempts retry with
//!   linear backoff before the message is quarantined.
//!
//! ## Cargo features
//!
//! - `kafka`: enable the rdkafka-backed producer/consumer (requires
//!   librdkafka)
//! - `kafka-static`: build librdkafka from source (requires cmake)
//!
//! ## Example
//!
//! ```rust,ignore
//! use triage_events::{BrokerConfig, BrokerConnection};
//!
//! let config = BrokerConfig::from_env()?;
//! let connection = BrokerConnection::connect(config).await?;
//! let publisher = connection.publisher("ingest-api");
//!
//! let event = publisher.publish(&body).await?;
//! tracing::info!(patient_id = %event.patient_id, "event accepted");
//! ```

// Core modules (always available)
pub mod batch;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod health;
pub mod producer;
pub mod record;
pub mod retry;
pub mod validate;

// Kafka-dependent modules (require `kafka` feature)
#[cfg(feature = "kafka")]
pub mod connection;
#[cfg(feature = "kafka")]
pub mod consumer;

// Re-exports for convenience (core types)
pub use batch::{BatchContext, BatchOutcome, BatchProcessor, EventSink, RawMessage};
pub use config::{BrokerConfig, BrokerConfigBuilder};
pub use dead_letter::{DeadLetterRecord, DeadLetterRouter, FailureDetail};
pub use error::EventError;
pub use event::{EventType, PatientEvent, Severity};
pub use health::HealthStatus;
pub use producer::EventPublisher;
pub use record::{RecordProducer, TopicRecord};
pub use retry::RetryPolicy;
pub use validate::{validate_event, FieldViolation, ValidationError};

// Re-exports for Kafka types (when feature enabled)
#[cfg(feature = "kafka")]
pub use connection::{BrokerConnection, KafkaRecordProducer};
#[cfg(feature = "kafka")]
pub use consumer::EventConsumer;
