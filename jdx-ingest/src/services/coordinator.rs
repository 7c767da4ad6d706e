//! Ingestion coordinator
//!
//! Runs one batch through parse → validate → persist/dead-letter → verify and
//! owns the batch lifecycle. A batch is processed start to finish inside a
//! single `submit_batch` call; separate submissions share nothing but the
//! pool and event bus.

use jdx_common::config::IngestSettings;
use jdx_common::events::{EventBus, JdxEvent};
use jdx_common::pagination::calculate_pagination;
use jdx_common::{Error, Page, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{batches, failed_rows};
use crate::models::{
    Batch, BatchIntegrityRecord, BatchSource, BatchStatus, BatchSummary, DiscrepancyType,
    FailedRowEntry, FailedRowFilter, StateTransition,
};
use crate::services::dlq::DlqManager;
use crate::services::integrity::IntegrityVerifier;
use crate::services::parser::{parse_artifact, FormatError};
use crate::services::persister::RowPersister;
use crate::services::validator::{self, RuleTable};
use crate::utils::retry_on_lock;

const INTERRUPTED: &str = "interrupted by restart";

#[derive(Debug, Error)]
pub enum IngestError {
    /// Artifact could not be parsed; the batch is FAILED
    #[error("Batch {batch_id} rejected: {source}")]
    Format {
        batch_id: Uuid,
        #[source]
        source: FormatError,
    },

    /// Fatal storage error mid-stream; the batch is FAILED
    #[error("Batch {batch_id} aborted: {message}")]
    Aborted { batch_id: Uuid, message: String },

    /// Batch record could not be created
    #[error(transparent)]
    Storage(#[from] Error),
}

impl IngestError {
    pub fn batch_id(&self) -> Option<Uuid> {
        match self {
            IngestError::Format { batch_id, .. } | IngestError::Aborted { batch_id, .. } => {
                Some(*batch_id)
            }
            IngestError::Storage(_) => None,
        }
    }
}

/// Why processing stopped early
enum Abort {
    Format(FormatError),
    Fatal(Error),
}

impl From<Error> for Abort {
    fn from(err: Error) -> Self {
        Abort::Fatal(err)
    }
}

/// Batch with its integrity snapshot and first failed rows
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub batch: BatchSummary,
    pub integrity: BatchIntegrityRecord,
    pub failed_rows: Vec<FailedRowEntry>,
    pub failed_row_total: i64,
}

#[derive(Debug, Clone)]
pub struct IngestionCoordinator {
    db: SqlitePool,
    event_bus: EventBus,
    settings: IngestSettings,
    rules: Arc<RuleTable>,
    persister: RowPersister,
    dlq: DlqManager,
    verifier: IntegrityVerifier,
}

impl IngestionCoordinator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        settings: IngestSettings,
        rules: Arc<RuleTable>,
    ) -> Self {
        let persister = RowPersister::new(db.clone(), settings.max_lock_wait_ms);
        let dlq = DlqManager::new(
            db.clone(),
            persister.clone(),
            Arc::clone(&rules),
            event_bus.clone(),
            settings.max_page_size,
        );
        let verifier = IntegrityVerifier::new(db.clone(), event_bus.clone());

        Self {
            db,
            event_bus,
            settings,
            rules,
            persister,
            dlq,
            verifier,
        }
    }

    pub fn dlq(&self) -> &DlqManager {
        &self.dlq
    }

    pub fn verifier(&self) -> &IntegrityVerifier {
        &self.verifier
    }

    /// Ingest one artifact
    ///
    /// Row-level failures never fail the batch; only an unparsable artifact
    /// or a storage error that prevents accounting for a row does.
    pub async fn submit_batch(
        &self,
        filename: &str,
        bytes: &[u8],
        source: BatchSource,
    ) -> std::result::Result<BatchSummary, IngestError> {
        let mut batch = Batch::new(filename.to_string(), source);
        batches::insert_batch(&self.db, &batch).await?;

        tracing::info!(
            batch_id = %batch.batch_id,
            filename = %batch.filename,
            source = %source,
            bytes = bytes.len(),
            "Batch submitted"
        );

        match self.process(&mut batch, bytes).await {
            Ok(record) => Ok(batch.summary(Some(&record))),
            Err(Abort::Format(e)) => {
                self.fail_batch(&mut batch, e.to_string()).await;
                Err(IngestError::Format {
                    batch_id: batch.batch_id,
                    source: e,
                })
            }
            Err(Abort::Fatal(e)) => {
                let message = e.to_string();
                self.fail_batch(&mut batch, message.clone()).await;
                Err(IngestError::Aborted {
                    batch_id: batch.batch_id,
                    message,
                })
            }
        }
    }

    async fn process(
        &self,
        batch: &mut Batch,
        bytes: &[u8],
    ) -> std::result::Result<BatchIntegrityRecord, Abort> {
        let started = self.transition(batch, BatchStatus::Processing).await?;
        self.event_bus.emit_lossy(JdxEvent::BatchStarted {
            batch_id: batch.batch_id,
            filename: batch.filename.clone(),
            source: batch.source.to_string(),
            timestamp: started.transitioned_at,
        });

        let parsed = parse_artifact(bytes, batch.source).map_err(Abort::Format)?;
        let total = parsed.rows.len() as i64;
        batch.begin_counting(total);
        self.save_progress(batch).await?;

        let rules = self.rules.get(batch.source).clone();
        let validated =
            validator::validate_all(parsed.rows, rules, self.settings.validation_workers).await?;

        for (position, (raw, outcome)) in validated.into_iter().enumerate() {
            let row_index = position as i64 + 1;

            match outcome {
                Ok(valid) => match self.persister.persist(&valid, batch.batch_id, row_index).await {
                    Ok(_) => batch.record_valid(),
                    Err(e) => {
                        self.dlq
                            .record_failure(
                                batch.batch_id,
                                row_index,
                                raw,
                                DiscrepancyType::PersistenceFailed,
                                e.to_string(),
                            )
                            .await?;
                        batch.record_invalid();
                    }
                },
                Err(e) => {
                    self.dlq
                        .record_failure(
                            batch.batch_id,
                            row_index,
                            raw,
                            DiscrepancyType::ValidationFailed,
                            e.to_string(),
                        )
                        .await?;
                    batch.record_invalid();
                }
            }

            let interval = self.settings.progress_flush_interval;
            if interval > 0 && (row_index as usize) % interval == 0 && row_index < total {
                self.save_progress(batch).await?;
            }
        }

        if !batch.is_fully_accounted() {
            return Err(Abort::Fatal(Error::Internal(format!(
                "row accounting mismatch: {} raw, {} routed",
                total,
                batch.rows_routed()
            ))));
        }
        self.save_progress(batch).await?;

        let record = self.verifier.check_batch_integrity(batch.batch_id).await?;
        let completed = self.transition(batch, BatchStatus::Completed).await?;

        let valid = batch.row_count_valid.unwrap_or(0);
        let invalid = batch.row_count_invalid.unwrap_or(0);
        tracing::info!(
            batch_id = %batch.batch_id,
            row_count_raw = total,
            row_count_valid = valid,
            row_count_invalid = invalid,
            integrity_score = record.integrity_score,
            "Batch completed"
        );
        self.event_bus.emit_lossy(JdxEvent::BatchCompleted {
            batch_id: batch.batch_id,
            row_count_raw: total,
            row_count_valid: valid,
            row_count_invalid: invalid,
            integrity_score: record.integrity_score,
            integrity_status: record.integrity_status.as_str().to_string(),
            timestamp: completed.transitioned_at,
        });

        Ok(record)
    }

    /// Apply a lifecycle edge in memory and in storage
    async fn transition(&self, batch: &mut Batch, next: BatchStatus) -> Result<StateTransition> {
        let before = batch.clone();
        let previous = batch.status;
        let transition = batch
            .transition_to(next)
            .map_err(|e| Error::Conflict(e.to_string()))?;

        let stored = retry_on_lock("update_batch", self.settings.max_lock_wait_ms, || {
            batches::update_batch(&self.db, &*batch, previous)
        })
        .await;
        if let Err(e) = stored {
            *batch = before;
            return Err(e);
        }

        tracing::debug!(
            batch_id = %transition.batch_id,
            from = transition.old_state.as_str(),
            to = transition.new_state.as_str(),
            at = %transition.transitioned_at,
            "Batch transitioned"
        );
        Ok(transition)
    }

    /// Flush counters and broadcast progress
    async fn save_progress(&self, batch: &Batch) -> Result<()> {
        retry_on_lock("update_batch", self.settings.max_lock_wait_ms, || {
            batches::update_batch(&self.db, batch, batch.status)
        })
        .await?;

        self.event_bus.emit_lossy(JdxEvent::BatchProgress {
            batch_id: batch.batch_id,
            processed: batch.rows_routed(),
            total: batch.row_count_raw.unwrap_or(0),
            row_count_valid: batch.row_count_valid.unwrap_or(0),
            row_count_invalid: batch.row_count_invalid.unwrap_or(0),
            timestamp: jdx_common::time::now(),
        });
        Ok(())
    }

    /// Move the batch to FAILED, best effort
    async fn fail_batch(&self, batch: &mut Batch, message: String) {
        tracing::error!(batch_id = %batch.batch_id, error = %message, "Batch failed");

        if !batch.status.can_transition_to(BatchStatus::Failed) {
            tracing::error!(
                batch_id = %batch.batch_id,
                status = batch.status.as_str(),
                "Batch cannot be marked FAILED from its current state"
            );
            return;
        }

        batch.error_summary = Some(message.clone());
        let timestamp = match self.transition(batch, BatchStatus::Failed).await {
            Ok(transition) => transition.transitioned_at,
            Err(e) => {
                tracing::error!(
                    batch_id = %batch.batch_id,
                    error = %e,
                    "Failed to record batch failure"
                );
                jdx_common::time::now()
            }
        };

        self.event_bus.emit_lossy(JdxEvent::BatchFailed {
            batch_id: batch.batch_id,
            error: message,
            timestamp,
        });
    }

    /// Fail batches a previous process left unfinished and release orphaned
    /// retry claims
    pub async fn recover_interrupted_batches(&self) -> Result<usize> {
        let unfinished = batches::load_unfinished_batches(&self.db).await?;
        let count = unfinished.len();

        for mut batch in unfinished {
            tracing::warn!(
                batch_id = %batch.batch_id,
                status = batch.status.as_str(),
                "Failing batch interrupted by restart"
            );
            if batch.status == BatchStatus::Pending {
                self.transition(&mut batch, BatchStatus::Processing).await?;
            }
            batch.error_summary = Some(INTERRUPTED.to_string());
            self.transition(&mut batch, BatchStatus::Failed).await?;
        }

        let released = failed_rows::release_stale_claims(&self.db).await?;
        if released > 0 {
            tracing::warn!(released, "Released retry claims left by previous process");
        }

        Ok(count)
    }

    /// Newest-first batch summaries
    pub async fn list_batches(&self, page: i64, page_size: i64) -> Result<Page<BatchSummary>> {
        let total = batches::count_batches(&self.db).await?;
        let pagination = calculate_pagination(total, page, page_size, self.settings.max_page_size);
        let rows = batches::list_batches(&self.db, pagination.offset, pagination.page_size).await?;
        let items = rows
            .iter()
            .map(|(batch, integrity)| batch.summary(integrity.as_ref()))
            .collect();
        Ok(Page::new(items, pagination, total))
    }

    pub async fn batch_detail(&self, batch_id: Uuid) -> Result<BatchDetail> {
        let batch = batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch not found: {}", batch_id)))?;

        let stored = crate::db::integrity::load_record(&self.db, batch_id).await?;
        let filter = FailedRowFilter {
            status: None,
            batch_id: Some(batch_id),
        };
        let failed = self
            .dlq
            .list_failed_rows(&filter, 1, self.settings.detail_failed_rows)
            .await?;

        Ok(BatchDetail {
            batch: batch.summary(stored.as_ref()),
            integrity: stored.unwrap_or_else(|| BatchIntegrityRecord::pending(batch_id)),
            failed_rows: failed.items,
            failed_row_total: failed.total_items,
        })
    }
}
