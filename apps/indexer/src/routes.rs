//! Health endpoint reporting per-dependency status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use triage_events::connection::BrokerConnection;

use crate::sink::EsSink;

pub const SERVICE_NAME: &str = "indexer";

#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<BrokerConnection>,
    pub sink: EsSink,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// `GET /health` — 503 with a per-dependency breakdown when either the
/// broker or the index is unreachable.
async fn health(State(state): State<AppState>) -> Response {
    let kafka_up = matches!(
        state.connection.health_check().await,
        Ok(status) if status.is_healthy()
    );
    let elasticsearch_up = state.sink.ping().await.is_ok();

    let healthy = kafka_up && elasticsearch_up;
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let up_down = |up: bool| if up { "up" } else { "down" };
    (
        status_code,
        Json(json!({
            "service": SERVICE_NAME,
            "status": if healthy { "ok" } else { "degraded" },
            "dependencies": {
                "kafka": up_down(kafka_up),
                "elasticsearch": up_down(elasticsearch_up),
            },
        })),
    )
        .into_response()
}
