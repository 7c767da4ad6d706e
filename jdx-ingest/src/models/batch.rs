//! Batch lifecycle state machine
//!
//! PENDING → PROCESSING → {COMPLETED | FAILED}. No other edges exist; a batch
//! in a terminal state is frozen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BatchIntegrityRecord, IntegrityStatus};

/// Upstream feed that produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSource {
    ExportFormatA,
    ExportFormatB,
    CourtDump,
    Manual,
}

impl BatchSource {
    pub const ALL: [BatchSource; 4] = [
        BatchSource::ExportFormatA,
        BatchSource::ExportFormatB,
        BatchSource::CourtDump,
        BatchSource::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchSource::ExportFormatA => "export_format_a",
            BatchSource::ExportFormatB => "export_format_b",
            BatchSource::CourtDump => "court_dump",
            BatchSource::Manual => "manual",
        }
    }
}

impl fmt::Display for BatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BatchSource::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Unknown source '{}' (expected one of: {})",
                    s,
                    BatchSource::ALL.map(|s| s.as_str()).join(", ")
                )
            })
    }
}

/// Batch workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    /// Created, artifact not yet parsed
    Pending,
    /// Rows being validated and routed
    Processing,
    /// All rows accounted for (partial success included)
    Completed,
    /// Artifact unparsable or fatal storage error
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::Processing)
                | (BatchStatus::Processing, BatchStatus::Completed)
                | (BatchStatus::Processing, BatchStatus::Failed)
        )
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BatchStatus::Pending),
            "PROCESSING" => Ok(BatchStatus::Processing),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            other => Err(format!("Unknown batch status '{}'", other)),
        }
    }
}

/// Rejected batch state change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid batch transition {from:?} -> {to:?} for batch {batch_id}")]
pub struct TransitionError {
    pub batch_id: Uuid,
    pub from: BatchStatus,
    pub to: BatchStatus,
}

/// Accepted batch state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub batch_id: Uuid,
    pub old_state: BatchStatus,
    pub new_state: BatchStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One submitted artifact and its processing outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub batch_id: Uuid,
    pub filename: String,
    pub source: BatchSource,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Rows parsed from the artifact; None when it failed to parse
    pub row_count_raw: Option<i64>,
    pub row_count_valid: Option<i64>,
    pub row_count_invalid: Option<i64>,
    pub error_summary: Option<String>,
}

impl Batch {
    pub fn new(filename: String, source: BatchSource) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            filename,
            source,
            status: BatchStatus::Pending,
            created_at: jdx_common::time::now(),
            completed_at: None,
            row_count_raw: None,
            row_count_valid: None,
            row_count_invalid: None,
            error_summary: None,
        }
    }

    /// Move to `new_state` if the lifecycle allows it
    pub fn transition_to(&mut self, new_state: BatchStatus) -> Result<StateTransition, TransitionError> {
        if !self.status.can_transition_to(new_state) {
            return Err(TransitionError {
                batch_id: self.batch_id,
                from: self.status,
                to: new_state,
            });
        }

        let now = jdx_common::time::now();
        let transition = StateTransition {
            batch_id: self.batch_id,
            old_state: self.status,
            new_state,
            transitioned_at: now,
        };
        self.status = new_state;
        if new_state.is_terminal() {
            self.completed_at = Some(now);
        }

        Ok(transition)
    }

    /// Record the parsed row count and zero the routing counters
    pub fn begin_counting(&mut self, row_count_raw: i64) {
        self.row_count_raw = Some(row_count_raw);
        self.row_count_valid = Some(0);
        self.row_count_invalid = Some(0);
    }

    pub fn record_valid(&mut self) {
        if !self.status.is_terminal() {
            *self.row_count_valid.get_or_insert(0) += 1;
        }
    }

    pub fn record_invalid(&mut self) {
        if !self.status.is_terminal() {
            *self.row_count_invalid.get_or_insert(0) += 1;
        }
    }

    /// Rows routed so far (persisted + dead-lettered)
    pub fn rows_routed(&self) -> i64 {
        self.row_count_valid.unwrap_or(0) + self.row_count_invalid.unwrap_or(0)
    }

    /// valid + invalid == raw
    pub fn is_fully_accounted(&self) -> bool {
        match self.row_count_raw {
            Some(raw) => self.rows_routed() == raw,
            None => false,
        }
    }

    pub fn summary(&self, integrity: Option<&BatchIntegrityRecord>) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id,
            filename: self.filename.clone(),
            source: self.source,
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
            row_count_raw: self.row_count_raw,
            row_count_valid: self.row_count_valid,
            row_count_invalid: self.row_count_invalid,
            error_summary: self.error_summary.clone(),
            integrity_score: integrity.map(|r| r.integrity_score),
            integrity_status: integrity.map(|r| r.integrity_status),
        }
    }
}

/// Batch read model for listings and submission responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub filename: String,
    pub source: BatchSource,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub row_count_raw: Option<i64>,
    pub row_count_valid: Option<i64>,
    pub row_count_invalid: Option<i64>,
    pub error_summary: Option<String>,
    /// Present once the batch has been verified
    pub integrity_score: Option<f64>,
    pub integrity_status: Option<IntegrityStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trips_through_str() {
        for source in BatchSource::ALL {
            assert_eq!(source.as_str().parse::<BatchSource>().unwrap(), source);
        }
        assert!("csv".parse::<BatchSource>().is_err());
    }

    #[test]
    fn test_source_serializes_snake_case() {
        let json = serde_json::to_string(&BatchSource::CourtDump).unwrap();
        assert_eq!(json, "\"court_dump\"");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut batch = Batch::new("a.csv".to_string(), BatchSource::Manual);
        assert_eq!(batch.status, BatchStatus::Pending);

        batch.transition_to(BatchStatus::Processing).unwrap();
        assert!(batch.completed_at.is_none());

        let t = batch.transition_to(BatchStatus::Completed).unwrap();
        assert_eq!(t.old_state, BatchStatus::Processing);
        assert_eq!(t.new_state, BatchStatus::Completed);
        assert!(batch.completed_at.is_some());
    }

    #[test]
    fn test_rejected_transitions() {
        let mut batch = Batch::new("a.csv".to_string(), BatchSource::Manual);

        // Cannot skip PROCESSING
        let err = batch.transition_to(BatchStatus::Completed).unwrap_err();
        assert_eq!(err.from, BatchStatus::Pending);
        assert_eq!(batch.status, BatchStatus::Pending);

        batch.transition_to(BatchStatus::Processing).unwrap();
        batch.transition_to(BatchStatus::Failed).unwrap();

        // Terminal states have no exits
        for next in [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
        ] {
            assert!(batch.transition_to(next).is_err());
        }
    }

    #[test]
    fn test_counters_freeze_at_terminal_state() {
        let mut batch = Batch::new("a.csv".to_string(), BatchSource::Manual);
        batch.transition_to(BatchStatus::Processing).unwrap();
        batch.begin_counting(3);
        batch.record_valid();
        batch.record_valid();
        batch.record_invalid();
        assert!(batch.is_fully_accounted());

        batch.transition_to(BatchStatus::Completed).unwrap();
        batch.record_valid();
        batch.record_invalid();
        assert_eq!(batch.row_count_valid, Some(2));
        assert_eq!(batch.row_count_invalid, Some(1));
    }

    #[test]
    fn test_unparsed_batch_is_not_accounted() {
        let batch = Batch::new("a.csv".to_string(), BatchSource::Manual);
        assert!(!batch.is_fully_accounted());
        assert_eq!(batch.rows_routed(), 0);
    }
}
