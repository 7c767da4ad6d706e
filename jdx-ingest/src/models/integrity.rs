//! Batch integrity snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// Never checked
    Pending,
    Verified,
    Discrepancy,
}

impl IntegrityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityStatus::Pending => "pending",
            IntegrityStatus::Verified => "verified",
            IntegrityStatus::Discrepancy => "discrepancy",
        }
    }
}

impl FromStr for IntegrityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntegrityStatus::Pending),
            "verified" => Ok(IntegrityStatus::Verified),
            "discrepancy" => Ok(IntegrityStatus::Discrepancy),
            other => Err(format!("Unknown integrity status '{}'", other)),
        }
    }
}

/// Materialized comparison of expected vs. stored rows for one batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchIntegrityRecord {
    pub batch_id: Uuid,
    /// Rows expected in the store
    pub csv_row_count: i64,
    /// Rows currently stored for the batch
    pub db_row_count: i64,
    /// Percentage in [0, 100]
    pub integrity_score: f64,
    pub integrity_status: IntegrityStatus,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl BatchIntegrityRecord {
    /// Placeholder for a batch that has never been verified
    pub fn pending(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            csv_row_count: 0,
            db_row_count: 0,
            integrity_score: 0.0,
            integrity_status: IntegrityStatus::Pending,
            last_check_at: None,
        }
    }

    /// Build a record from fresh counts
    pub fn compute(batch_id: Uuid, csv_row_count: i64, db_row_count: i64, checked_at: DateTime<Utc>) -> Self {
        let integrity_status = if csv_row_count == db_row_count {
            IntegrityStatus::Verified
        } else {
            IntegrityStatus::Discrepancy
        };

        Self {
            batch_id,
            csv_row_count,
            db_row_count,
            integrity_score: integrity_score(csv_row_count, db_row_count),
            integrity_status,
            last_check_at: Some(checked_at),
        }
    }

    /// Same counts, score and status (ignores check time)
    pub fn same_outcome(&self, other: &BatchIntegrityRecord) -> bool {
        self.batch_id == other.batch_id
            && self.csv_row_count == other.csv_row_count
            && self.db_row_count == other.db_row_count
            && self.integrity_score == other.integrity_score
            && self.integrity_status == other.integrity_status
    }
}

/// Stored/expected agreement as a percentage, truncated to 2 decimals
///
/// `db / csv * 100` while the store holds no more than expected. An
/// over-count scores `csv / db * 100`, so with rows expected 100 is reached
/// only on an exact match. Nothing expected scores 100; the status still
/// reports a discrepancy if anything is stored.
pub fn integrity_score(csv_row_count: i64, db_row_count: i64) -> f64 {
    let expected = csv_row_count.max(0);
    let stored = db_row_count.max(0);

    if expected == 0 || expected == stored {
        return 100.0;
    }

    // Integer basis points so 57/100 is 57.00, not 56.99
    let (low, high) = (expected.min(stored) as i128, expected.max(stored) as i128);
    let basis_points = low * 10_000 / high;
    (basis_points as f64 / 100.0).clamp(0.0, 100.0)
}
