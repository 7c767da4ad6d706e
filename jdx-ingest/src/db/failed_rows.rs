//! Dead-letter entry database operations
//!
//! Resolution changes are compare-and-set updates keyed on the current
//! `resolution_status`; a `false` return means the entry was not in the
//! expected state and nothing was written.

use chrono::{DateTime, Utc};
use jdx_common::time::{from_storage, to_storage};
use jdx_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_column, parse_uuid};
use crate::models::{DiscrepancyType, FailedRowEntry, FailedRowFilter, RawRow, ResolutionStatus};

const ENTRY_COLUMNS: &str = "id, batch_id, row_index, raw_data, discrepancy_type, error_message, \
     resolution_status, retry_count, created_at, updated_at, resolution_notes";

/// Record a failed row; a second failure for the same source row is ignored
///
/// Returns true when a new entry was written.
pub async fn insert_entry(pool: &SqlitePool, entry: &FailedRowEntry) -> Result<bool> {
    let raw_data = serde_json::to_string(&entry.raw_data)
        .map_err(|e| Error::Internal(format!("Failed to serialize raw row: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO failed_row_entries (
            id, batch_id, row_index, raw_data, discrepancy_type, error_message,
            resolution_status, retry_count, created_at, updated_at, resolution_notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(batch_id, row_index) DO NOTHING
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.batch_id.to_string())
    .bind(entry.row_index)
    .bind(raw_data)
    .bind(entry.discrepancy_type.as_str())
    .bind(&entry.error_message)
    .bind(entry.resolution_status.as_str())
    .bind(entry.retry_count)
    .bind(to_storage(&entry.created_at))
    .bind(to_storage(&entry.updated_at))
    .bind(&entry.resolution_notes)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn load_entry(pool: &SqlitePool, id: Uuid) -> Result<Option<FailedRowEntry>> {
    let row = sqlx::query(&format!("SELECT {} FROM failed_row_entries WHERE id = ?", ENTRY_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(entry_from_row).transpose()
}

pub async fn count_entries(pool: &SqlitePool, filter: &FailedRowFilter) -> Result<i64> {
    let (status, batch_id) = filter_binds(filter);
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM failed_row_entries
        WHERE (? IS NULL OR resolution_status = ?)
          AND (? IS NULL OR batch_id = ?)
        "#,
    )
    .bind(status)
    .bind(status)
    .bind(&batch_id)
    .bind(&batch_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Filtered page of entries in (created_at, row_index) order
pub async fn list_entries(
    pool: &SqlitePool,
    filter: &FailedRowFilter,
    offset: i64,
    limit: i64,
) -> Result<Vec<FailedRowEntry>> {
    let (status, batch_id) = filter_binds(filter);
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM failed_row_entries
        WHERE (? IS NULL OR resolution_status = ?)
          AND (? IS NULL OR batch_id = ?)
        ORDER BY created_at, batch_id, row_index
        LIMIT ? OFFSET ?
        "#,
        ENTRY_COLUMNS
    ))
    .bind(status)
    .bind(status)
    .bind(&batch_id)
    .bind(&batch_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// pending → retry_scheduled
pub async fn claim_for_retry(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE failed_row_entries
        SET resolution_status = 'retry_scheduled', updated_at = ?
        WHERE id = ? AND resolution_status = 'pending'
        "#,
    )
    .bind(to_storage(&now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// retry_scheduled → resolved
pub async fn mark_resolved(pool: &SqlitePool, id: Uuid, notes: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE failed_row_entries
        SET resolution_status = 'resolved', resolution_notes = ?, updated_at = ?
        WHERE id = ? AND resolution_status = 'retry_scheduled'
        "#,
    )
    .bind(notes)
    .bind(to_storage(&now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// retry_scheduled → pending, counting the failed attempt
pub async fn release_failed_retry(
    pool: &SqlitePool,
    id: Uuid,
    discrepancy_type: DiscrepancyType,
    error_message: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE failed_row_entries
        SET resolution_status = 'pending',
            retry_count = retry_count + 1,
            discrepancy_type = ?,
            error_message = ?,
            updated_at = ?
        WHERE id = ? AND resolution_status = 'retry_scheduled'
        "#,
    )
    .bind(discrepancy_type.as_str())
    .bind(error_message)
    .bind(to_storage(&now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// retry_scheduled → pending without counting an attempt
///
/// Used when a retry could not reach an outcome (storage error mid-retry).
pub async fn release_claim(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE failed_row_entries
        SET resolution_status = 'pending', updated_at = ?
        WHERE id = ? AND resolution_status = 'retry_scheduled'
        "#,
    )
    .bind(to_storage(&now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// pending → ignored
pub async fn mark_ignored(
    pool: &SqlitePool,
    id: Uuid,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE failed_row_entries
        SET resolution_status = 'ignored',
            resolution_notes = COALESCE(?, resolution_notes),
            updated_at = ?
        WHERE id = ? AND resolution_status = 'pending'
        "#,
    )
    .bind(notes)
    .bind(to_storage(&now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Entries of a batch later committed through a retry
pub async fn count_resolved_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM failed_row_entries WHERE batch_id = ? AND resolution_status = 'resolved'",
    )
    .bind(batch_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Return retry claims orphaned by a previous process to `pending`
///
/// The outcome of an interrupted retry is unknown; a later retry is safe
/// because persistence is idempotent.
pub async fn release_stale_claims(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE failed_row_entries
        SET resolution_status = 'pending', updated_at = ?
        WHERE resolution_status = 'retry_scheduled'
        "#,
    )
    .bind(to_storage(&jdx_common::time::now()))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() as usize)
}

fn filter_binds(filter: &FailedRowFilter) -> (Option<&'static str>, Option<String>) {
    (
        filter.status.map(|s| s.as_str()),
        filter.batch_id.map(|id| id.to_string()),
    )
}

fn entry_from_row(row: &SqliteRow) -> Result<FailedRowEntry> {
    let id: String = row.get("id");
    let batch_id: String = row.get("batch_id");
    let raw_data: String = row.get("raw_data");
    let discrepancy_type: String = row.get("discrepancy_type");
    let resolution_status: String = row.get("resolution_status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    let raw_data: RawRow = serde_json::from_str(&raw_data)
        .map_err(|e| Error::Internal(format!("Failed to deserialize raw_data: {}", e)))?;
    let resolution_status: ResolutionStatus = parse_column("resolution_status", &resolution_status)?;

    Ok(FailedRowEntry {
        id: parse_uuid("id", &id)?,
        batch_id: parse_uuid("batch_id", &batch_id)?,
        row_index: row.get("row_index"),
        raw_data,
        discrepancy_type: parse_column("discrepancy_type", &discrepancy_type)?,
        error_message: row.get("error_message"),
        resolution_status,
        retry_count: row.get("retry_count"),
        created_at: from_storage(&created_at)?,
        updated_at: from_storage(&updated_at)?,
        resolution_notes: row.get("resolution_notes"),
    })
}
