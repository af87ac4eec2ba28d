//! `idsr-core`: surveillance domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! case reports, their delivery state machine and declared outbreaks.

pub mod case;
pub mod error;
pub mod id;
pub mod outbreak;
pub mod sync_state;

pub use case::{AttachmentRef, CaseLocation, CaseReport, CaseReportDraft, CaseStatus, Gender};
pub use error::{DomainError, DomainResult};
pub use id::{CaseId, ClientLocalId, OutbreakId, UserId};
pub use outbreak::{Outbreak, OutbreakDeclaration, OutbreakStatus};
pub use sync_state::{FailureKind, SyncFailure, SyncState};
