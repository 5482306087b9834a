//! HTTP routes: event ingestion and broker health.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use triage_events::EventError;

use crate::state::{AppState, SERVICE_NAME};

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(publish_event))
        .route("/health", get(health))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

/// Attach a request id (propagated or generated) and log each request.
async fn request_id(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "request complete"
    );

    response
}

/// `POST /events` — validate and publish one patient event.
///
/// The caller always learns the outcome: a dead-lettered event still
/// returns an error status, the record is for recovery, not notification.
async fn publish_event(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    match state.publisher.publish(&body).await {
        Ok(event) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "event": event})),
        )
            .into_response(),
        Err(EventError::Validation(validation)) => {
            let violations: Vec<Value> = validation
                .violations
                .iter()
                .map(|v| json!({"field": v.field, "message": v.message}))
                .collect();
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "event validation failed", "violations": violations})),
            )
                .into_response()
        }
        Err(oversize @ EventError::Oversize { .. }) => (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({"error": oversize.to_string()})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to publish event");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "failed to publish event"})),
            )
                .into_response()
        }
    }
}

/// `GET /health` — broker reachability via topology query.
async fn health(State(state): State<AppState>) -> Response {
    match state.connection.health_check().await {
        Ok(status) if status.is_healthy() => (
            StatusCode::OK,
            Json(json!({
                "service": SERVICE_NAME,
                "status": "ok",
                "dependencies": {"kafka": "up"},
            })),
        )
            .into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "service": SERVICE_NAME,
                "status": "degraded",
                "dependencies": {"kafka": "down"},
            })),
        )
            .into_response(),
    }
}
