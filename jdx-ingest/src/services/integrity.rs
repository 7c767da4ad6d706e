//! Integrity verification
//!
//! Compares the rows a batch is expected to have in storage with a live count
//! of what is actually there, and keeps the outcome as a one-per-batch
//! snapshot.

use jdx_common::events::{EventBus, JdxEvent};
use jdx_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{batches, failed_rows, integrity, judgments};
use crate::models::BatchIntegrityRecord;

#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    db: SqlitePool,
    event_bus: EventBus,
}

impl IntegrityVerifier {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Recompute and store the integrity snapshot for a batch
    ///
    /// An unchanged outcome returns the stored snapshot as-is, check time
    /// included.
    pub async fn check_batch_integrity(&self, batch_id: Uuid) -> Result<BatchIntegrityRecord> {
        let batch = batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch not found: {}", batch_id)))?;

        let resolved = failed_rows::count_resolved_for_batch(&self.db, batch_id).await?;
        let csv_row_count = batch.row_count_valid.unwrap_or(0) + resolved;
        let db_row_count = judgments::count_for_batch(&self.db, batch_id).await?;

        let fresh = BatchIntegrityRecord::compute(
            batch_id,
            csv_row_count,
            db_row_count,
            jdx_common::time::now(),
        );

        if let Some(stored) = integrity::load_record(&self.db, batch_id).await? {
            if stored.same_outcome(&fresh) {
                tracing::debug!(batch_id = %batch_id, "Integrity unchanged since last check");
                return Ok(stored);
            }
        }

        integrity::upsert_record(&self.db, &fresh).await?;

        if fresh.integrity_score < 100.0 {
            tracing::warn!(
                batch_id = %batch_id,
                csv_row_count,
                db_row_count,
                integrity_score = fresh.integrity_score,
                "Integrity discrepancy"
            );
        } else {
            tracing::info!(batch_id = %batch_id, db_row_count, "Integrity verified");
        }

        self.event_bus.emit_lossy(JdxEvent::IntegrityChecked {
            batch_id,
            csv_row_count,
            db_row_count,
            integrity_score: fresh.integrity_score,
            integrity_status: fresh.integrity_status.as_str().to_string(),
            timestamp: jdx_common::time::now(),
        });

        Ok(fresh)
    }

    /// Stored snapshot, or `pending` if the batch was never checked
    pub async fn current_record(&self, batch_id: Uuid) -> Result<BatchIntegrityRecord> {
        Ok(integrity::load_record(&self.db, batch_id)
            .await?
            .unwrap_or_else(|| BatchIntegrityRecord::pending(batch_id)))
    }
}
