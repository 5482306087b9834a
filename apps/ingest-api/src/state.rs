//! Shared application state.

use std::sync::Arc;

use triage_events::connection::{BrokerConnection, KafkaRecordProducer};
use triage_events::EventPublisher;

pub const SERVICE_NAME: &str = "ingest-api";

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<EventPublisher<KafkaRecordProducer>>,
    pub connection: Arc<BrokerConnection>,
}

impl AppState {
    pub fn new(connection: Arc<BrokerConnection>) -> Self {
        let publisher = Arc::new(connection.publisher(SERVICE_NAME));
        Self {
            publisher,
            connection,
        }
    }
}
