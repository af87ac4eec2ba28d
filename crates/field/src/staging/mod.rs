//! Durable local staging of case reports awaiting delivery.
//!
//! This module defines the device-side store every report lands in before it
//! is delivered, plus an in-memory implementation for tests/dev and a SQLite
//! implementation for the field client.

pub mod in_memory;
pub mod sqlite;
pub mod r#trait;

pub use in_memory::InMemoryStagingStore;
pub use r#trait::{StagedReport, StagingError, StagingStore};
pub use sqlite::SqliteStagingStore;
