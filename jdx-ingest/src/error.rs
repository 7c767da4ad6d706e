//! Error types for jdx-ingest HTTP handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{DlqError, IngestError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., retry already in progress
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Artifact could not be parsed (422)
    #[error("{message}")]
    UnprocessableFormat {
        batch_id: uuid::Uuid,
        message: String,
    },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// jdx-common error
    #[error("Common error: {0}")]
    Common(jdx_common::Error),
}

impl From<jdx_common::Error> for ApiError {
    fn from(err: jdx_common::Error) -> Self {
        use jdx_common::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Common(other),
        }
    }
}

impl From<DlqError> for ApiError {
    fn from(err: DlqError) -> Self {
        match err {
            DlqError::NotFound(_) => ApiError::NotFound(err.to_string()),
            DlqError::RetryInProgress(_) | DlqError::InvalidTransition { .. } => {
                ApiError::Conflict(err.to_string())
            }
            DlqError::Storage(e) => e.into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Format { batch_id, source } => ApiError::UnprocessableFormat {
                batch_id,
                message: source.to_string(),
            },
            IngestError::Aborted { .. } => ApiError::Internal(err.to_string()),
            IngestError::Storage(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, batch_id) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            ApiError::UnprocessableFormat { batch_id, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "FORMAT_ERROR",
                message,
                Some(batch_id),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None),
            ApiError::Common(ref err) => {
                let code = match err {
                    jdx_common::Error::Database(_) | jdx_common::Error::Busy(_) => "DATABASE_ERROR",
                    _ => "INTERNAL_ERROR",
                };
                (StatusCode::INTERNAL_SERVER_ERROR, code, err.to_string(), None)
            }
        };

        let fault = status.is_server_error().then(|| ServerFault(message.clone()));

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let Some(batch_id) = batch_id {
            error["batch_id"] = json!(batch_id);
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();
        if let Some(fault) = fault {
            response.extensions_mut().insert(fault);
        }
        response
    }
}

/// Message of a server-side failure, attached to 5xx responses so the
/// health tracker can pick it up
#[derive(Debug, Clone)]
pub struct ServerFault(pub String);

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
