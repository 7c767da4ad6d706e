//! HTTP API handlers for jdx-ingest

pub mod batches;
pub mod failed_rows;
pub mod health;
pub mod sse;

pub use batches::batch_routes;
pub use failed_rows::failed_row_routes;
pub use health::{health_routes, track_server_errors};
pub use sse::event_stream;
