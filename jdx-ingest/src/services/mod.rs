//! Ingestion pipeline components
//!
//! Leaf-first: parser and validator are pure, the persister and DLQ manager
//! write rows, the verifier reconciles counts, and the coordinator drives a
//! batch through all of them.

pub mod coordinator;
pub mod dlq;
pub mod integrity;
pub mod parser;
pub mod persister;
pub mod validator;

pub use coordinator::{BatchDetail, IngestError, IngestionCoordinator};
pub use dlq::{DlqError, DlqManager, RetryOutcome};
pub use integrity::IntegrityVerifier;
pub use parser::{parse_artifact, FormatError, ParsedArtifact};
pub use persister::{PersistOutcome, PersistenceError, PersistenceErrorKind, RowPersister};
pub use validator::{validate, validate_all, RuleTable, SourceRules};
