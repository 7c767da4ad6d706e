//! jdx-ingest library interface
//!
//! Batch ingestion and integrity reconciliation for judgment exports.
//! Exposes the pipeline services and the HTTP router for the binary and for
//! integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use jdx_common::config::IngestSettings;
use jdx_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::services::{IngestionCoordinator, RuleTable};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub coordinator: IngestionCoordinator,
    pub settings: IngestSettings,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server-side error, reported by /health
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, settings: IngestSettings, rules: RuleTable) -> Self {
        let coordinator = IngestionCoordinator::new(
            db.clone(),
            event_bus.clone(),
            settings.clone(),
            Arc::new(rules),
        );
        Self {
            db,
            event_bus,
            coordinator,
            settings,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn record_error(&self, message: String) {
        *self.last_error.write().await = Some(message);
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::get;

    Router::new()
        .merge(api::batch_routes())
        .merge(api::failed_row_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::track_server_errors,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
