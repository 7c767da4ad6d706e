//! Batch API handlers
//!
//! POST /batches, GET /batches, GET /batches/:batch_id,
//! POST /batches/:batch_id/verify

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use jdx_common::Page;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{BatchIntegrityRecord, BatchSource, BatchSummary};
use crate::services::BatchDetail;
use crate::AppState;

/// Largest artifact accepted in one request body
pub const MAX_ARTIFACT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct SubmitBatchQuery {
    pub filename: String,
    pub source: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// POST /batches?filename=&source=
///
/// Body is the raw artifact. Returns 201 with the batch summary; an
/// unparsable artifact is 422 with the id of the FAILED batch.
pub async fn submit_batch(
    State(state): State<AppState>,
    Query(query): Query<SubmitBatchQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<BatchSummary>)> {
    let filename = query.filename.trim();
    if filename.is_empty() {
        return Err(ApiError::BadRequest("filename must not be empty".to_string()));
    }
    let source: BatchSource = query.source.parse().map_err(ApiError::BadRequest)?;

    let summary = state.coordinator.submit_batch(filename, &body, source).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /batches?page=&page_size=
pub async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<BatchSummary>>> {
    let page = state
        .coordinator
        .list_batches(
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(state.settings.default_page_size),
        )
        .await?;
    Ok(Json(page))
}

/// GET /batches/:batch_id
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<BatchDetail>> {
    let batch_id = parse_id(&batch_id)?;
    Ok(Json(state.coordinator.batch_detail(batch_id).await?))
}

/// POST /batches/:batch_id/verify
pub async fn verify_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<BatchIntegrityRecord>> {
    let batch_id = parse_id(&batch_id)?;
    let record = state
        .coordinator
        .verifier()
        .check_batch_integrity(batch_id)
        .await?;
    Ok(Json(record))
}

pub(crate) fn parse_id(value: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| ApiError::BadRequest(format!("Invalid id: {}", value)))
}

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/batches",
            post(submit_batch)
                .layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES))
                .get(list_batches),
        )
        .route("/batches/:batch_id", get(get_batch))
        .route("/batches/:batch_id/verify", post(verify_batch))
}
