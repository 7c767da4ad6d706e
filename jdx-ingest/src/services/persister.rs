//! Row persistence
//!
//! Writes validated rows to the `judgments` table. Storage failures are
//! returned as a typed `PersistenceError`, never propagated, so the caller
//! can dead-letter the row and keep going.

use jdx_common::Error;
use serde::{Deserialize, Serialize};
use sqlx::error::ErrorKind;
use sqlx::SqlitePool;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::db::judgments;
use crate::models::ValidRow;
use crate::utils::retry_on_lock;

/// Successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// Natural key already stored; nothing written
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceErrorKind {
    ConstraintViolation,
    DuplicateKey,
    Connectivity,
    Other,
}

impl fmt::Display for PersistenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PersistenceErrorKind::ConstraintViolation => "constraint violation",
            PersistenceErrorKind::DuplicateKey => "duplicate key",
            PersistenceErrorKind::Connectivity => "connectivity fault",
            PersistenceErrorKind::Other => "storage error",
        };
        f.write_str(s)
    }
}

/// Per-row storage failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PersistenceError {
    pub kind: PersistenceErrorKind,
    pub message: String,
}

impl PersistenceError {
    /// Classify a storage error
    pub fn classify(err: &Error) -> Self {
        let kind = match err {
            Error::Busy(_) | Error::Io(_) => PersistenceErrorKind::Connectivity,
            Error::Database(db) => classify_sqlx(db),
            _ => PersistenceErrorKind::Other,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

fn classify_sqlx(err: &sqlx::Error) -> PersistenceErrorKind {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PersistenceErrorKind::Connectivity
        }
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_ascii_lowercase();
            if CONNECTIVITY_MESSAGES.iter().any(|m| message.contains(m)) {
                return PersistenceErrorKind::Connectivity;
            }

            match db_err.kind() {
                ErrorKind::UniqueViolation => return PersistenceErrorKind::DuplicateKey,
                ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => return PersistenceErrorKind::ConstraintViolation,
                _ => {}
            }

            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            match primary {
                // BUSY, LOCKED, IOERR, CANTOPEN
                Some(5) | Some(6) | Some(10) | Some(14) => PersistenceErrorKind::Connectivity,
                // CONSTRAINT
                Some(19) => PersistenceErrorKind::ConstraintViolation,
                _ => PersistenceErrorKind::Other,
            }
        }
        _ => PersistenceErrorKind::Other,
    }
}

/// Messages that indicate a lost or unreachable store regardless of code
const CONNECTIVITY_MESSAGES: [&str; 4] = [
    "connection reset",
    "connection refused",
    "broken pipe",
    "disk i/o error",
];

/// Writes validated rows; cheap to clone
#[derive(Debug, Clone)]
pub struct RowPersister {
    db: SqlitePool,
    max_lock_wait_ms: u64,
}

impl RowPersister {
    pub fn new(db: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self { db, max_lock_wait_ms }
    }

    /// Persist one row of a batch
    ///
    /// Idempotent on `(batch_id, row_index, content_hash)`.
    pub async fn persist(
        &self,
        row: &ValidRow,
        batch_id: Uuid,
        row_index: i64,
    ) -> Result<PersistOutcome, PersistenceError> {
        let content_hash = row.content_hash();

        let inserted = retry_on_lock("persist_judgment", self.max_lock_wait_ms, || {
            judgments::insert_judgment(&self.db, batch_id, row_index, row, &content_hash)
        })
        .await
        .map_err(|e| {
            let error = PersistenceError::classify(&e);
            tracing::warn!(
                batch_id = %batch_id,
                row_index,
                kind = ?error.kind,
                error = %error.message,
                "Row persistence failed"
            );
            error
        })?;

        if inserted {
            Ok(PersistOutcome::Inserted)
        } else {
            tracing::debug!(batch_id = %batch_id, row_index, "Row already stored");
            Ok(PersistOutcome::AlreadyPresent)
        }
    }
}
