//! Committed judgment rows

use jdx_common::time::to_storage;
use jdx_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::ValidRow;

/// Insert a judgment unless its natural key is already stored
///
/// Returns true when a new row was written.
pub async fn insert_judgment(
    pool: &SqlitePool,
    batch_id: Uuid,
    row_index: i64,
    row: &ValidRow,
    content_hash: &str,
) -> Result<bool> {
    let raw_data = serde_json::to_string(&row.raw)
        .map_err(|e| Error::Internal(format!("Failed to serialize raw row: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO judgments (
            id, batch_id, row_index, content_hash, case_number,
            plaintiff_name, defendant_name, judgment_amount, judgment_date,
            court, county, raw_data, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(batch_id, row_index, content_hash) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(batch_id.to_string())
    .bind(row_index)
    .bind(content_hash)
    .bind(&row.case_number)
    .bind(&row.plaintiff_name)
    .bind(&row.defendant_name)
    .bind(row.judgment_amount.map(|a| a.to_string()))
    .bind(row.judgment_date.map(|d| d.format("%Y-%m-%d").to_string()))
    .bind(&row.court)
    .bind(&row.county)
    .bind(raw_data)
    .bind(to_storage(&jdx_common::time::now()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Live count of stored rows attributable to a batch
pub async fn count_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM judgments WHERE batch_id = ?")
        .bind(batch_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}
