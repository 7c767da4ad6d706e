//! Dead letter queue API handlers
//!
//! GET /failed-rows, GET /failed-rows/:row_id,
//! POST /failed-rows/:row_id/retry, POST /failed-rows/:row_id/ignore

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use jdx_common::Page;
use serde::{Deserialize, Serialize};

use super::batches::parse_id;
use crate::error::{ApiError, ApiResult};
use crate::models::{FailedRowEntry, FailedRowFilter, ResolutionStatus};
use crate::services::RetryOutcome;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FailedRowQuery {
    pub status: Option<String>,
    pub batch_id: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IgnoreRequest {
    pub notes: Option<String>,
}

/// POST /failed-rows/:row_id/retry response
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    /// "resolved", "still_failing" or "already_resolved"
    pub outcome: &'static str,
    pub succeeded: bool,
    pub entry: FailedRowEntry,
}

impl From<RetryOutcome> for RetryResponse {
    fn from(outcome: RetryOutcome) -> Self {
        let label = match outcome {
            RetryOutcome::Resolved(_) => "resolved",
            RetryOutcome::StillFailing(_) => "still_failing",
            RetryOutcome::AlreadyResolved(_) => "already_resolved",
        };
        Self {
            outcome: label,
            succeeded: outcome.succeeded(),
            entry: outcome.into_entry(),
        }
    }
}

/// GET /failed-rows?status=&batch_id=&page=&page_size=
pub async fn list_failed_rows(
    State(state): State<AppState>,
    Query(query): Query<FailedRowQuery>,
) -> ApiResult<Json<Page<FailedRowEntry>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ResolutionStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let batch_id = query.batch_id.as_deref().map(parse_id).transpose()?;

    let page = state
        .coordinator
        .dlq()
        .list_failed_rows(
            &FailedRowFilter { status, batch_id },
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(state.settings.default_page_size),
        )
        .await?;
    Ok(Json(page))
}

/// GET /failed-rows/:row_id
pub async fn get_failed_row(
    State(state): State<AppState>,
    Path(row_id): Path<String>,
) -> ApiResult<Json<FailedRowEntry>> {
    let row_id = parse_id(&row_id)?;
    Ok(Json(state.coordinator.dlq().get_failed_row(row_id).await?))
}

/// POST /failed-rows/:row_id/retry
pub async fn retry_failed_row(
    State(state): State<AppState>,
    Path(row_id): Path<String>,
) -> ApiResult<Json<RetryResponse>> {
    let row_id = parse_id(&row_id)?;
    let outcome = state.coordinator.dlq().retry_failed_row(row_id).await?;
    Ok(Json(outcome.into()))
}

/// POST /failed-rows/:row_id/ignore
///
/// Optional JSON body `{"notes": "..."}`.
pub async fn ignore_failed_row(
    State(state): State<AppState>,
    Path(row_id): Path<String>,
    request: Option<Json<IgnoreRequest>>,
) -> ApiResult<Json<FailedRowEntry>> {
    let row_id = parse_id(&row_id)?;
    let notes = request.and_then(|Json(r)| r.notes);
    let entry = state
        .coordinator
        .dlq()
        .ignore_failed_row(row_id, notes.as_deref())
        .await?;
    Ok(Json(entry))
}

pub fn failed_row_routes() -> Router<AppState> {
    Router::new()
        .route("/failed-rows", get(list_failed_rows))
        .route("/failed-rows/:row_id", get(get_failed_row))
        .route("/failed-rows/:row_id/retry", post(retry_failed_row))
        .route("/failed-rows/:row_id/ignore", post(ignore_failed_row))
}
