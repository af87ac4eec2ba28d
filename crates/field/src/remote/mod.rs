//! Remote store boundary.
//!
//! The remote store is an opaque table service: insert a row, query rows by a
//! simple filter, patch rows. Rows are JSON objects.

pub mod in_memory;
#[cfg(feature = "rest")]
pub mod rest;
pub mod r#trait;

pub use in_memory::InMemoryRemoteStore;
#[cfg(feature = "rest")]
pub use rest::RestRemoteStore;
pub use r#trait::{Condition, Filter, Op, Record, RemoteError, RemoteStore};

/// Table names used by the field client.
pub mod tables {
    pub const CASE_REPORTS: &str = "case_reports";
    pub const FACILITIES: &str = "facilities";
    pub const DISTRICTS: &str = "districts";
    pub const OUTBREAKS: &str = "outbreaks";
}
