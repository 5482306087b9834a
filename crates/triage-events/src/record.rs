//! Wire records for the event and dead-letter topics.

use async_trait::async_trait;

use crate::error::EventError;

/// Header naming the role that emitted a record (publisher vs indexer).
pub const HEADER_SOURCE: &str = "source";

/// Header carrying the wire schema version.
pub const HEADER_SCHEMA_VERSION: &str = "schemaVersion";

/// Current wire schema version.
pub const SCHEMA_VERSION: &str = "1";

/// A record addressed to one topic: partition key, headers, and the
/// serialized value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRecord {
    pub topic: String,
    /// Partition key. Events always carry the patient id; dead-letter
    /// records for unparseable messages may have none.
    pub key: Option<String>,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl TopicRecord {
    /// Build a record with the standard `source` / `schemaVersion` headers.
    pub fn new(
        topic: impl Into<String>,
        key: Option<String>,
        source: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key,
            headers: vec![
                (HEADER_SOURCE.to_string(), source.into()),
                (HEADER_SCHEMA_VERSION.to_string(), SCHEMA_VERSION.to_string()),
            ],
            payload,
        }
    }

    /// Serialized value size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Send-side seam over the broker producer.
///
/// The concrete Kafka transport lives behind the `kafka` feature; tests
/// drive the publish and dead-letter paths with in-memory implementations.
#[async_trait]
pub trait RecordProducer: Send + Sync {
    async fn send(&self, record: &TopicRecord) -> Result<(), EventError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_headers() {
        let record = TopicRecord::new(
            "patient.events",
            Some("P-7".to_string()),
            "ingest-api",
            b"{}".to_vec(),
        );

        assert_eq!(record.headers.len(), 2);
        assert_eq!(
            record.headers[0],
            ("source".to_string(), "ingest-api".to_string())
        );
        assert_eq!(
            record.headers[1],
            ("schemaVersion".to_string(), "1".to_string())
        );
    }

    #[test]
    fn test_payload_len() {
        let record = TopicRecord::new("t", None, "s", vec![0u8; 42]);
        assert_eq!(record.payload_len(), 42);
    }
}
