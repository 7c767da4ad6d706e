//! # JDX Common Library
//!
//! Shared code for the JDX judgment ingestion services:
//! - Error type and result alias
//! - Configuration loading and root folder resolution
//! - Event types (JdxEvent enum) and the EventBus
//! - Pagination helpers for listing endpoints
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod pagination;
pub mod time;

pub use error::{Error, Result};
pub use pagination::{Page, Pagination};
