use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use idsr_core::{CaseReport, ClientLocalId, SyncFailure, SyncState};

/// A case report held on the device together with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedReport {
    pub report: CaseReport,
    pub sync_state: SyncState,
    /// Set while the record is `failed`; cleared on any other transition.
    pub failure: Option<SyncFailure>,
    /// Number of delivery claims (`pending -> syncing`) made so far.
    pub attempts: u32,
    pub staged_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StagedReport {
    pub fn new(report: CaseReport, now: DateTime<Utc>) -> Self {
        Self {
            report,
            sync_state: SyncState::Pending,
            failure: None,
            attempts: 0,
            staged_at: now,
            updated_at: now,
        }
    }

    pub fn local_id(&self) -> &ClientLocalId {
        &self.report.client_local_id
    }

    /// Whether a scheduled run should pick this record up.
    pub fn is_due(&self) -> bool {
        match self.sync_state {
            SyncState::Pending => true,
            SyncState::Failed => self
                .failure
                .as_ref()
                .is_none_or(|f| f.kind.is_auto_retryable()),
            SyncState::Syncing | SyncState::Synced => false,
        }
    }

    /// Apply a state change in place. Callers have already checked the
    /// transition against the current state.
    pub(crate) fn apply(&mut self, next: SyncState, failure: Option<SyncFailure>, now: DateTime<Utc>) {
        if next == SyncState::Syncing {
            self.attempts += 1;
        }
        self.sync_state = next;
        self.failure = if next == SyncState::Failed { failure } else { None };
        self.updated_at = now;
    }
}

/// Staging store operation error.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("report {0} is already staged")]
    AlreadyStaged(ClientLocalId),

    #[error("report {0} is not staged")]
    NotFound(ClientLocalId),

    /// The record was not in a state that allows the requested move. For a
    /// `pending -> syncing` claim this means another run got there first.
    #[error("report {local_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        local_id: ClientLocalId,
        from: SyncState,
        to: SyncState,
    },

    #[error("staging storage error: {0}")]
    Storage(String),
}

/// Device-local staging of case reports.
///
/// `update_state` is the only mutation path after `stage`. Each update is a
/// compare-and-set on the record's current state, so concurrent callers
/// racing on the same transition see exactly one winner.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Insert a report in state `pending`. Never validates the report.
    async fn stage(&self, report: CaseReport) -> Result<StagedReport, StagingError>;

    /// Records currently in `state`, oldest staged first.
    async fn list_by_state(&self, state: SyncState) -> Result<Vec<StagedReport>, StagingError>;

    async fn update_state(
        &self,
        local_id: &ClientLocalId,
        next: SyncState,
        failure: Option<SyncFailure>,
    ) -> Result<StagedReport, StagingError>;

    async fn get(&self, local_id: &ClientLocalId) -> Result<Option<StagedReport>, StagingError>;

    /// Delete `synced` records last updated before `older_than`. Returns the
    /// number of records removed.
    async fn clear_synced(&self, older_than: DateTime<Utc>) -> Result<u64, StagingError>;
}

#[async_trait]
impl<S> StagingStore for Arc<S>
where
    S: StagingStore + ?Sized,
{
    async fn stage(&self, report: CaseReport) -> Result<StagedReport, StagingError> {
        (**self).stage(report).await
    }

    async fn list_by_state(&self, state: SyncState) -> Result<Vec<StagedReport>, StagingError> {
        (**self).list_by_state(state).await
    }

    async fn update_state(
        &self,
        local_id: &ClientLocalId,
        next: SyncState,
        failure: Option<SyncFailure>,
    ) -> Result<StagedReport, StagingError> {
        (**self).update_state(local_id, next, failure).await
    }

    async fn get(&self, local_id: &ClientLocalId) -> Result<Option<StagedReport>, StagingError> {
        (**self).get(local_id).await
    }

    async fn clear_synced(&self, older_than: DateTime<Utc>) -> Result<u64, StagingError> {
        (**self).clear_synced(older_than).await
    }
}
