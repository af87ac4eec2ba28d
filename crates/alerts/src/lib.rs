//! `idsr-alerts`
//!
//! **Responsibility:** Rule-based surveillance signals.
//!
//! This crate is intentionally **pure**:
//! - It never performs I/O or mutates case/outbreak state.
//! - It emits **alerts and cluster candidates**, which callers may escalate or
//!   turn into an explicit outbreak declaration.

pub mod alert;
pub mod cluster;
pub mod rules;

pub use alert::DiseaseAlert;
pub use cluster::{CaseRecord, ClusterCandidate, ClusterKey, OutbreakClusterDetector};
pub use rules::{AlertRuleEngine, MAX_SUGGESTIONS, Suggestion};
