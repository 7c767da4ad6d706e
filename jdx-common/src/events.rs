//! Event types for the JDX event system
//!
//! Provides shared event definitions and the EventBus used to fan batch,
//! dead-letter and integrity events out to SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// JDX event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JdxEvent {
    /// Batch accepted and moved to PROCESSING
    BatchStarted {
        batch_id: Uuid,
        filename: String,
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// Periodic routing progress for a batch
    BatchProgress {
        batch_id: Uuid,
        /// Rows routed so far
        processed: i64,
        /// Rows parsed from the artifact
        total: i64,
        row_count_valid: i64,
        row_count_invalid: i64,
        timestamp: DateTime<Utc>,
    },

    /// Batch reached COMPLETED
    BatchCompleted {
        batch_id: Uuid,
        row_count_raw: i64,
        row_count_valid: i64,
        row_count_invalid: i64,
        integrity_score: f64,
        integrity_status: String,
        timestamp: DateTime<Utc>,
    },

    /// Batch reached FAILED
    BatchFailed {
        batch_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Dead-letter entry resolved by an operator retry
    FailedRowResolved {
        row_id: Uuid,
        batch_id: Uuid,
        retry_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// Operator retry of a dead-letter entry failed again
    FailedRowRetryFailed {
        row_id: Uuid,
        batch_id: Uuid,
        retry_count: i64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Dead-letter entry ignored by an operator
    FailedRowIgnored {
        row_id: Uuid,
        batch_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Integrity snapshot recomputed for a batch
    IntegrityChecked {
        batch_id: Uuid,
        csv_row_count: i64,
        db_row_count: i64,
        integrity_score: f64,
        integrity_status: String,
        timestamp: DateTime<Utc>,
    },
}

impl JdxEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            JdxEvent::BatchStarted { .. } => "BatchStarted",
            JdxEvent::BatchProgress { .. } => "BatchProgress",
            JdxEvent::BatchCompleted { .. } => "BatchCompleted",
            JdxEvent::BatchFailed { .. } => "BatchFailed",
            JdxEvent::FailedRowResolved { .. } => "FailedRowResolved",
            JdxEvent::FailedRowRetryFailed { .. } => "FailedRowRetryFailed",
            JdxEvent::FailedRowIgnored { .. } => "FailedRowIgnored",
            JdxEvent::IntegrityChecked { .. } => "IntegrityChecked",
        }
    }

    /// Batch this event belongs to
    pub fn batch_id(&self) -> Uuid {
        match self {
            JdxEvent::BatchStarted { batch_id, .. }
            | JdxEvent::BatchProgress { batch_id, .. }
            | JdxEvent::BatchCompleted { batch_id, .. }
            | JdxEvent::BatchFailed { batch_id, .. }
            | JdxEvent::FailedRowResolved { batch_id, .. }
            | JdxEvent::FailedRowRetryFailed { batch_id, .. }
            | JdxEvent::FailedRowIgnored { batch_id, .. }
            | JdxEvent::IntegrityChecked { batch_id, .. } => *batch_id,
        }
    }
}

/// Broadcast bus for JdxEvent
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JdxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<JdxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: JdxEvent) -> Result<usize, broadcast::error::SendError<JdxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: JdxEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
