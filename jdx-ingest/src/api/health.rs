//! Health check endpoint

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::error::ServerFault;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" once an error has been recorded
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Connected SSE clients
    pub event_subscribers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();
    let status = if last_error.is_some() { "degraded" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "jdx-ingest".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        event_subscribers: state.event_bus.subscriber_count(),
        last_error,
    })
}

/// Remember the last server-side failure of any handler for /health
pub async fn track_server_errors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if let Some(ServerFault(message)) = response.extensions().get::<ServerFault>() {
        state.record_error(message.clone()).await;
    }
    response
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
