//! Dead-letter queue entries
//!
//! Resolution lifecycle: pending → retry_scheduled → {resolved | pending},
//! pending → ignored. `resolved` and `ignored` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::RawRow;

/// Why a row ended up in the DLQ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyType {
    ValidationFailed,
    PersistenceFailed,
}

impl DiscrepancyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyType::ValidationFailed => "validation_failed",
            DiscrepancyType::PersistenceFailed => "persistence_failed",
        }
    }
}

impl FromStr for DiscrepancyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation_failed" => Ok(DiscrepancyType::ValidationFailed),
            "persistence_failed" => Ok(DiscrepancyType::PersistenceFailed),
            other => Err(format!("Unknown discrepancy type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    RetryScheduled,
    Resolved,
    Ignored,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::RetryScheduled => "retry_scheduled",
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::Ignored => "ignored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolutionStatus::Resolved | ResolutionStatus::Ignored)
    }

    pub fn can_transition_to(&self, next: ResolutionStatus) -> bool {
        matches!(
            (self, next),
            (ResolutionStatus::Pending, ResolutionStatus::RetryScheduled)
                | (ResolutionStatus::Pending, ResolutionStatus::Ignored)
                | (ResolutionStatus::RetryScheduled, ResolutionStatus::Resolved)
                | (ResolutionStatus::RetryScheduled, ResolutionStatus::Pending)
        )
    }
}

impl FromStr for ResolutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResolutionStatus::Pending),
            "retry_scheduled" => Ok(ResolutionStatus::RetryScheduled),
            "resolved" => Ok(ResolutionStatus::Resolved),
            "ignored" => Ok(ResolutionStatus::Ignored),
            other => Err(format!("Unknown resolution status '{}'", other)),
        }
    }
}

/// A row that could not be committed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedRowEntry {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// 1-based position in the source artifact
    pub row_index: i64,
    /// Full original row, kept for inspection and retry
    pub raw_data: RawRow,
    pub discrepancy_type: DiscrepancyType,
    pub error_message: String,
    pub resolution_status: ResolutionStatus,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolution_notes: Option<String>,
}

impl FailedRowEntry {
    pub fn new(
        batch_id: Uuid,
        row_index: i64,
        raw_data: RawRow,
        discrepancy_type: DiscrepancyType,
        error_message: String,
    ) -> Self {
        let now = jdx_common::time::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            row_index,
            raw_data,
            discrepancy_type,
            error_message,
            resolution_status: ResolutionStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            resolution_notes: None,
        }
    }
}

/// DLQ listing filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailedRowFilter {
    pub status: Option<ResolutionStatus>,
    pub batch_id: Option<Uuid>,
}
