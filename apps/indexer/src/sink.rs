//! Elasticsearch-backed event sink.
//!
//! Each write creates a new document; under at-least-once delivery a
//! redelivered event produces a second document rather than an upsert.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::info;

use triage_events::{EventError, EventSink, PatientEvent};

/// Static mapping for the patient events index. Dynamic mapping is off at
/// the top level so stray fields cannot widen the schema.
fn index_mappings() -> serde_json::Value {
    json!({
        "dynamic": false,
        "properties": {
            "patientId": {"type": "keyword"},
            "eventType": {"type": "keyword"},
            "severity": {"type": "keyword"},
            "department": {
                "type": "text",
                "fields": {"keyword": {"type": "keyword"}}
            },
            "data": {"type": "object", "dynamic": true},
            "timestamp": {"type": "date"}
        }
    })
}

#[derive(Clone)]
pub struct EsSink {
    client: Client,
    base_url: String,
    index: String,
}

impl EsSink {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>) -> Result<Self, EventError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EventError::SinkFailed {
                cause: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            index: index.into(),
        })
    }

    /// Reachability probe against the cluster root.
    pub async fn ping(&self) -> Result<(), EventError> {
        self.client
            .get(&self.base_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| EventError::SinkFailed {
                cause: e.to_string(),
            })
    }

    /// Create the index with its static mapping if it does not exist yet.
    pub async fn ensure_index(&self) -> Result<(), EventError> {
        let index_url = format!("{}/{}", self.base_url, self.index);

        let head = self
            .client
            .head(&index_url)
            .send()
            .await
            .map_err(|e| EventError::SinkFailed {
                cause: e.to_string(),
            })?;

        match head.status() {
            StatusCode::OK => return Ok(()),
            StatusCode::NOT_FOUND => {}
            status => {
                return Err(EventError::SinkFailed {
                    cause: format!("index existence check returned {status}"),
                })
            }
        }

        self.client
            .put(&index_url)
            .json(&json!({"mappings": index_mappings()}))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EventError::SinkFailed {
                cause: e.to_string(),
            })?;

        info!(index = %self.index, "created patient events index");
        Ok(())
    }
}

#[async_trait]
impl EventSink for EsSink {
    async fn write(&self, event: &PatientEvent) -> Result<(), EventError> {
        self.client
            .post(format!("{}/{}/_doc", self.base_url, self.index))
            .json(event)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| EventError::SinkFailed {
                cause: e.to_string(),
            })
    }
}
