//! Data models for jdx-ingest
//!
//! - Batch lifecycle state machine
//! - Dead-letter entry resolution state machine
//! - Integrity snapshot
//! - Raw and validated row payloads

pub mod batch;
pub mod failed_row;
pub mod integrity;
pub mod row;

pub use batch::{Batch, BatchSource, BatchStatus, BatchSummary, StateTransition, TransitionError};
pub use failed_row::{DiscrepancyType, FailedRowEntry, FailedRowFilter, ResolutionStatus};
pub use integrity::{integrity_score, BatchIntegrityRecord, IntegrityStatus};
pub use row::{FieldViolation, RawRow, ValidRow, ValidationError};
