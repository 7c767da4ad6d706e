//! Integrity record database operations

use jdx_common::time::{from_storage, to_storage};
use jdx_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_column, parse_uuid};
use crate::models::BatchIntegrityRecord;

/// Insert or replace the snapshot for a batch
pub async fn upsert_record(pool: &SqlitePool, record: &BatchIntegrityRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO batch_integrity_records (
            batch_id, csv_row_count, db_row_count, integrity_score,
            integrity_status, last_check_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(batch_id) DO UPDATE SET
            csv_row_count = excluded.csv_row_count,
            db_row_count = excluded.db_row_count,
            integrity_score = excluded.integrity_score,
            integrity_status = excluded.integrity_status,
            last_check_at = excluded.last_check_at
        "#,
    )
    .bind(record.batch_id.to_string())
    .bind(record.csv_row_count)
    .bind(record.db_row_count)
    .bind(record.integrity_score)
    .bind(record.integrity_status.as_str())
    .bind(record.last_check_at.as_ref().map(to_storage))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_record(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<BatchIntegrityRecord>> {
    let row = sqlx::query(
        r#"
        SELECT batch_id, csv_row_count, db_row_count, integrity_score,
               integrity_status, last_check_at
        FROM batch_integrity_records
        WHERE batch_id = ?
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

pub(crate) fn record_from_row(row: &SqliteRow) -> Result<BatchIntegrityRecord> {
    let batch_id: String = row.get("batch_id");
    let status: String = row.get("integrity_status");
    let last_check_at: Option<String> = row.get("last_check_at");

    Ok(BatchIntegrityRecord {
        batch_id: parse_uuid("batch_id", &batch_id)?,
        csv_row_count: row.get("csv_row_count"),
        db_row_count: row.get("db_row_count"),
        integrity_score: row.get("integrity_score"),
        integrity_status: parse_column("integrity_status", &status)?,
        last_check_at: last_check_at.as_deref().map(from_storage).transpose()?,
    })
}
