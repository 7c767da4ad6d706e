//! Database access for jdx-ingest
//!
//! Four collections keyed by batch identity: `batches`, `failed_row_entries`
//! (one-to-many), `batch_integrity_records` (one-to-one) and `judgments`
//! (the committed rows).

pub mod batches;
pub mod failed_rows;
pub mod integrity;
pub mod judgments;

use jdx_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Initialize database connection pool
///
/// Creates the database file if missing and ensures the schema exists.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(250));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables, indexes and guard triggers if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            batch_id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            source TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            row_count_raw INTEGER,
            row_count_valid INTEGER,
            row_count_invalid INTEGER,
            error_summary TEXT
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_batches_created_at ON batches (created_at)",
        r#"
        CREATE TABLE IF NOT EXISTS failed_row_entries (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches (batch_id),
            row_index INTEGER NOT NULL,
            raw_data TEXT NOT NULL,
            discrepancy_type TEXT NOT NULL,
            error_message TEXT NOT NULL,
            resolution_status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            resolution_notes TEXT,
            UNIQUE (batch_id, row_index)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_failed_rows_status ON failed_row_entries (resolution_status)",
        "CREATE INDEX IF NOT EXISTS idx_failed_rows_batch ON failed_row_entries (batch_id)",
        r#"
        CREATE TABLE IF NOT EXISTS batch_integrity_records (
            batch_id TEXT PRIMARY KEY REFERENCES batches (batch_id),
            csv_row_count INTEGER NOT NULL,
            db_row_count INTEGER NOT NULL,
            integrity_score REAL NOT NULL,
            integrity_status TEXT NOT NULL,
            last_check_at TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS judgments (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches (batch_id),
            row_index INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            case_number TEXT NOT NULL,
            plaintiff_name TEXT,
            defendant_name TEXT,
            judgment_amount TEXT,
            judgment_date TEXT,
            court TEXT,
            county TEXT,
            raw_data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (batch_id, row_index, content_hash)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_judgments_batch ON judgments (batch_id)",
        // Audit trail: batches and DLQ entries are append-only
        r#"
        CREATE TRIGGER IF NOT EXISTS batches_no_delete
        BEFORE DELETE ON batches
        BEGIN
            SELECT RAISE(ABORT, 'batches are never deleted');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS batches_frozen_when_terminal
        BEFORE UPDATE ON batches
        WHEN OLD.status IN ('COMPLETED', 'FAILED')
        BEGIN
            SELECT RAISE(ABORT, 'batch is in a terminal state');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS failed_rows_no_delete
        BEFORE DELETE ON failed_row_entries
        BEGIN
            SELECT RAISE(ABORT, 'failed row entries are never deleted');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS failed_rows_retry_count_monotonic
        BEFORE UPDATE OF retry_count ON failed_row_entries
        WHEN NEW.retry_count < OLD.retry_count
        BEGIN
            SELECT RAISE(ABORT, 'retry_count may not decrease');
        END
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized (batches, failed_row_entries, batch_integrity_records, judgments)");

    Ok(())
}

/// Decode a stored enum column
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse::<T>()
        .map_err(|e| jdx_common::Error::Internal(format!("Bad value in column {}: {}", column, e)))
}

/// Decode a stored UUID column
pub(crate) fn parse_uuid(column: &str, value: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| jdx_common::Error::Internal(format!("Bad UUID in column {}: {}", column, e)))
}
