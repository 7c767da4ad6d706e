//! Batch database operations

use jdx_common::time::{from_storage, to_storage};
use jdx_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_column, parse_uuid};
use crate::models::{Batch, BatchIntegrityRecord, BatchStatus};

const BATCH_COLUMNS: &str = "b.batch_id, b.filename, b.source, b.status, b.created_at, b.completed_at, \
     b.row_count_raw, b.row_count_valid, b.row_count_invalid, b.error_summary";

/// Insert a freshly created batch
pub async fn insert_batch(pool: &SqlitePool, batch: &Batch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO batches (
            batch_id, filename, source, status, created_at, completed_at,
            row_count_raw, row_count_valid, row_count_invalid, error_summary
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.batch_id.to_string())
    .bind(&batch.filename)
    .bind(batch.source.as_str())
    .bind(batch.status.as_str())
    .bind(to_storage(&batch.created_at))
    .bind(batch.completed_at.as_ref().map(to_storage))
    .bind(batch.row_count_raw)
    .bind(batch.row_count_valid)
    .bind(batch.row_count_invalid)
    .bind(&batch.error_summary)
    .execute(pool)
    .await?;

    Ok(())
}

/// Write status, counters and error summary
///
/// `expected_status` is the status the stored row must still have; a
/// mismatch means another writer moved the batch and is reported as a
/// conflict instead of overwriting it.
pub async fn update_batch(pool: &SqlitePool, batch: &Batch, expected_status: BatchStatus) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE batches
        SET status = ?,
            completed_at = ?,
            row_count_raw = ?,
            row_count_valid = ?,
            row_count_invalid = ?,
            error_summary = ?
        WHERE batch_id = ? AND status = ?
        "#,
    )
    .bind(batch.status.as_str())
    .bind(batch.completed_at.as_ref().map(to_storage))
    .bind(batch.row_count_raw)
    .bind(batch.row_count_valid)
    .bind(batch.row_count_invalid)
    .bind(&batch.error_summary)
    .bind(batch.batch_id.to_string())
    .bind(expected_status.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "Batch {} is no longer {}",
            batch.batch_id,
            expected_status.as_str()
        )));
    }

    Ok(())
}

/// Load batch by id
pub async fn load_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<Batch>> {
    let row = sqlx::query(&format!("SELECT {} FROM batches b WHERE b.batch_id = ?", BATCH_COLUMNS))
        .bind(batch_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Count all batches
pub async fn count_batches(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Newest-first page of batches joined with their integrity record, if any
pub async fn list_batches(
    pool: &SqlitePool,
    offset: i64,
    limit: i64,
) -> Result<Vec<(Batch, Option<BatchIntegrityRecord>)>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {},
               i.csv_row_count, i.db_row_count, i.integrity_score,
               i.integrity_status, i.last_check_at
        FROM batches b
        LEFT JOIN batch_integrity_records i ON i.batch_id = b.batch_id
        ORDER BY b.created_at DESC, b.batch_id
        LIMIT ? OFFSET ?
        "#,
        BATCH_COLUMNS
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let batch = batch_from_row(row)?;
            let integrity = match row.get::<Option<String>, _>("integrity_status") {
                Some(_) => Some(super::integrity::record_from_row(row)?),
                None => None,
            };
            Ok((batch, integrity))
        })
        .collect()
}

/// Batches a previous process left in PENDING or PROCESSING
pub async fn load_unfinished_batches(pool: &SqlitePool) -> Result<Vec<Batch>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM batches b WHERE b.status IN ('PENDING', 'PROCESSING') ORDER BY b.created_at",
        BATCH_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(batch_from_row).collect()
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let batch_id: String = row.get("batch_id");
    let source: String = row.get("source");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(Batch {
        batch_id: parse_uuid("batch_id", &batch_id)?,
        filename: row.get("filename"),
        source: parse_column("source", &source)?,
        status: parse_column("status", &status)?,
        created_at: from_storage(&created_at)?,
        completed_at: completed_at.as_deref().map(from_storage).transpose()?,
        row_count_raw: row.get("row_count_raw"),
        row_count_valid: row.get("row_count_valid"),
        row_count_invalid: row.get("row_count_invalid"),
        error_summary: row.get("error_summary"),
    })
}
