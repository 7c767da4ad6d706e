//! Dead letter queue manager
//!
//! Owns `failed_row_entries` and their resolution lifecycle. Every status
//! change is a compare-and-set on the current status, so two operators
//! retrying the same entry cannot both re-process it.

use jdx_common::events::{EventBus, JdxEvent};
use jdx_common::pagination::calculate_pagination;
use jdx_common::{Error, Page};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::db::failed_rows;
use crate::models::{
    DiscrepancyType, FailedRowEntry, FailedRowFilter, RawRow, ResolutionStatus,
};
use crate::services::persister::RowPersister;
use crate::services::validator::{self, RuleTable};

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("Failed row not found: {0}")]
    NotFound(Uuid),

    #[error("Retry already in progress for failed row {0}")]
    RetryInProgress(Uuid),

    #[error("Failed row {id} is {status:?} and cannot be {action}")]
    InvalidTransition {
        id: Uuid,
        status: ResolutionStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Storage(#[from] Error),
}

/// Result of an operator retry
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    /// Row re-validated and stored; entry is now `resolved`
    Resolved(FailedRowEntry),
    /// Row failed again; entry is back to `pending` with retry_count bumped
    StillFailing(FailedRowEntry),
    /// Entry was already resolved; nothing was re-processed
    AlreadyResolved(FailedRowEntry),
}

impl RetryOutcome {
    pub fn entry(&self) -> &FailedRowEntry {
        match self {
            RetryOutcome::Resolved(entry)
            | RetryOutcome::StillFailing(entry)
            | RetryOutcome::AlreadyResolved(entry) => entry,
        }
    }

    pub fn into_entry(self) -> FailedRowEntry {
        match self {
            RetryOutcome::Resolved(entry)
            | RetryOutcome::StillFailing(entry)
            | RetryOutcome::AlreadyResolved(entry) => entry,
        }
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self, RetryOutcome::StillFailing(_))
    }
}

#[derive(Debug, Clone)]
pub struct DlqManager {
    db: SqlitePool,
    persister: RowPersister,
    rules: Arc<RuleTable>,
    event_bus: EventBus,
    max_page_size: i64,
}

impl DlqManager {
    pub fn new(
        db: SqlitePool,
        persister: RowPersister,
        rules: Arc<RuleTable>,
        event_bus: EventBus,
        max_page_size: i64,
    ) -> Self {
        Self {
            db,
            persister,
            rules,
            event_bus,
            max_page_size,
        }
    }

    /// Dead-letter a row
    ///
    /// Returns false when the row was already recorded for this batch.
    pub async fn record_failure(
        &self,
        batch_id: Uuid,
        row_index: i64,
        raw_data: RawRow,
        discrepancy_type: DiscrepancyType,
        error_message: String,
    ) -> Result<bool, Error> {
        let entry = FailedRowEntry::new(batch_id, row_index, raw_data, discrepancy_type, error_message);
        let inserted = failed_rows::insert_entry(&self.db, &entry).await?;
        tracing::debug!(
            batch_id = %batch_id,
            row_index,
            discrepancy_type = discrepancy_type.as_str(),
            error = %entry.error_message,
            inserted,
            "Row dead-lettered"
        );
        Ok(inserted)
    }

    pub async fn list_failed_rows(
        &self,
        filter: &FailedRowFilter,
        page: i64,
        page_size: i64,
    ) -> Result<Page<FailedRowEntry>, Error> {
        let total = failed_rows::count_entries(&self.db, filter).await?;
        let pagination = calculate_pagination(total, page, page_size, self.max_page_size);
        let items =
            failed_rows::list_entries(&self.db, filter, pagination.offset, pagination.page_size).await?;
        Ok(Page::new(items, pagination, total))
    }

    pub async fn get_failed_row(&self, row_id: Uuid) -> Result<FailedRowEntry, DlqError> {
        failed_rows::load_entry(&self.db, row_id)
            .await?
            .ok_or(DlqError::NotFound(row_id))
    }

    /// Re-validate and re-persist a `pending` entry
    pub async fn retry_failed_row(&self, row_id: Uuid) -> Result<RetryOutcome, DlqError> {
        let entry = self.get_failed_row(row_id).await?;

        match entry.resolution_status {
            ResolutionStatus::Resolved => return Ok(RetryOutcome::AlreadyResolved(entry)),
            ResolutionStatus::Pending => {}
            status => return Err(reject(row_id, status, "retried")),
        }

        if !failed_rows::claim_for_retry(&self.db, row_id, jdx_common::time::now()).await? {
            // Lost the race; report against whatever state won
            let current = self.get_failed_row(row_id).await?;
            return match current.resolution_status {
                ResolutionStatus::Resolved => Ok(RetryOutcome::AlreadyResolved(current)),
                status => Err(reject(row_id, status, "retried")),
            };
        }

        tracing::info!(
            row_id = %row_id,
            batch_id = %entry.batch_id,
            row_index = entry.row_index,
            retry_count = entry.retry_count,
            "Retrying failed row"
        );

        match self.attempt(&entry).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Leave the entry retryable rather than stuck in retry_scheduled
                if let Err(release_err) =
                    failed_rows::release_claim(&self.db, row_id, jdx_common::time::now()).await
                {
                    tracing::error!(
                        row_id = %row_id,
                        error = %release_err,
                        "Failed to release retry claim"
                    );
                }
                Err(e)
            }
        }
    }

    /// Claimed entry → resolved or back to pending
    async fn attempt(&self, entry: &FailedRowEntry) -> Result<RetryOutcome, DlqError> {
        let rules = self.rules.get(entry.raw_data.source);

        let failure = match validator::validate(&entry.raw_data, rules) {
            Err(e) => Some((DiscrepancyType::ValidationFailed, e.to_string())),
            Ok(valid) => match self.persister.persist(&valid, entry.batch_id, entry.row_index).await {
                Ok(_) => None,
                Err(e) => Some((DiscrepancyType::PersistenceFailed, e.to_string())),
            },
        };

        let now = jdx_common::time::now();

        match failure {
            None => {
                let notes = format!("Resolved by retry after {} failed attempt(s)", entry.retry_count);
                if !failed_rows::mark_resolved(&self.db, entry.id, &notes, now).await? {
                    return Err(claim_lost(entry.id));
                }
                let updated = self.get_failed_row(entry.id).await?;

                tracing::info!(row_id = %entry.id, batch_id = %entry.batch_id, "Failed row resolved");
                self.event_bus.emit_lossy(JdxEvent::FailedRowResolved {
                    row_id: entry.id,
                    batch_id: entry.batch_id,
                    retry_count: updated.retry_count,
                    timestamp: now,
                });
                Ok(RetryOutcome::Resolved(updated))
            }
            Some((discrepancy_type, message)) => {
                if !failed_rows::release_failed_retry(&self.db, entry.id, discrepancy_type, &message, now)
                    .await?
                {
                    return Err(claim_lost(entry.id));
                }
                let updated = self.get_failed_row(entry.id).await?;

                tracing::warn!(
                    row_id = %entry.id,
                    batch_id = %entry.batch_id,
                    retry_count = updated.retry_count,
                    error = %message,
                    "Retry failed"
                );
                self.event_bus.emit_lossy(JdxEvent::FailedRowRetryFailed {
                    row_id: entry.id,
                    batch_id: entry.batch_id,
                    retry_count: updated.retry_count,
                    error: message,
                    timestamp: now,
                });
                Ok(RetryOutcome::StillFailing(updated))
            }
        }
    }

    /// Mark a `pending` entry as ignored; ignoring twice is a no-op
    pub async fn ignore_failed_row(
        &self,
        row_id: Uuid,
        notes: Option<&str>,
    ) -> Result<FailedRowEntry, DlqError> {
        let entry = self.get_failed_row(row_id).await?;

        match entry.resolution_status {
            ResolutionStatus::Ignored => return Ok(entry),
            ResolutionStatus::Pending => {}
            status => return Err(reject(row_id, status, "ignored")),
        }

        let now = jdx_common::time::now();
        if !failed_rows::mark_ignored(&self.db, row_id, notes, now).await? {
            let current = self.get_failed_row(row_id).await?;
            return match current.resolution_status {
                ResolutionStatus::Ignored => Ok(current),
                status => Err(reject(row_id, status, "ignored")),
            };
        }

        tracing::info!(row_id = %row_id, batch_id = %entry.batch_id, "Failed row ignored");
        self.event_bus.emit_lossy(JdxEvent::FailedRowIgnored {
            row_id,
            batch_id: entry.batch_id,
            timestamp: now,
        });

        self.get_failed_row(row_id).await
    }
}

/// The retry claim was released before the outcome could be written
fn claim_lost(id: Uuid) -> DlqError {
    tracing::warn!(row_id = %id, "Retry claim lost before outcome was recorded");
    DlqError::Storage(Error::Conflict(format!(
        "Retry claim on failed row {} was released before its outcome was recorded",
        id
    )))
}

fn reject(id: Uuid, status: ResolutionStatus, action: &'static str) -> DlqError {
    match status {
        ResolutionStatus::RetryScheduled => DlqError::RetryInProgress(id),
        status => DlqError::InvalidTransition { id, status, action },
    }
}
