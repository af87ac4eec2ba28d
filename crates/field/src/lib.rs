//! `idsr-field`
//!
//! **Responsibility:** Offline-resilient case reporting for field devices.
//!
//! This crate provides:
//! - Durable local staging of case reports (SQLite on device)
//! - Idempotent delivery to the remote store, one record at a time
//! - Disease alert evaluation after each delivered report
//! - A background worker driven by connectivity, requests and a backstop interval
//! - Outbreak cluster queries and human-gated outbreak declaration
//!
//! The remote store stays the authority; the device never reads back reports.

pub mod clusters;
pub mod config;
pub mod offline;
pub mod remote;
pub mod staging;
pub mod sync;
pub mod sync_worker;

pub use clusters::{
    ClusterError, declare, declare_outbreak, fetch_cluster_candidates, list_outbreaks,
    update_outbreak_status,
};
pub use config::{ConfigError, FieldConfig};
pub use offline::{Connectivity, ConnectivityState, OfflineError};
pub use remote::{Filter, InMemoryRemoteStore, Record, RemoteError, RemoteStore};
pub use staging::{InMemoryStagingStore, SqliteStagingStore, StagedReport, StagingError, StagingStore};
pub use sync::{AlertSink, InMemoryAlertSink, SyncCoordinator, SyncError, SyncSummary, TracingAlertSink};
pub use sync_worker::{SyncEvent, SyncTrigger, SyncWorker, SyncWorkerHandle};
