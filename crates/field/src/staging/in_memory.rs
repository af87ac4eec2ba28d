use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use idsr_core::{CaseReport, ClientLocalId, SyncFailure, SyncState};

use super::r#trait::{StagedReport, StagingError, StagingStore};

#[derive(Debug)]
struct Slot {
    seq: u64,
    staged: StagedReport,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    slots: HashMap<ClientLocalId, Slot>,
}

/// In-memory staging store.
///
/// Intended for tests/dev. Not durable.
#[derive(Debug, Default)]
pub struct InMemoryStagingStore {
    inner: RwLock<Inner>,
}

impl InMemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StagingError {
    StagingError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn stage(&self, report: CaseReport) -> Result<StagedReport, StagingError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        if inner.slots.contains_key(&report.client_local_id) {
            return Err(StagingError::AlreadyStaged(report.client_local_id));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let staged = StagedReport::new(report, Utc::now());
        inner.slots.insert(
            staged.local_id().clone(),
            Slot {
                seq,
                staged: staged.clone(),
            },
        );
        Ok(staged)
    }

    async fn list_by_state(&self, state: SyncState) -> Result<Vec<StagedReport>, StagingError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut hits: Vec<&Slot> = inner
            .slots
            .values()
            .filter(|s| s.staged.sync_state == state)
            .collect();
        hits.sort_by_key(|s| (s.staged.staged_at, s.seq));
        Ok(hits.into_iter().map(|s| s.staged.clone()).collect())
    }

    async fn update_state(
        &self,
        local_id: &ClientLocalId,
        next: SyncState,
        failure: Option<SyncFailure>,
    ) -> Result<StagedReport, StagingError> {
        // Check and write under one lock: this is the compare-and-set.
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let slot = inner
            .slots
            .get_mut(local_id)
            .ok_or_else(|| StagingError::NotFound(local_id.clone()))?;

        let current = slot.staged.sync_state;
        if !current.can_transition_to(next) {
            return Err(StagingError::InvalidTransition {
                local_id: local_id.clone(),
                from: current,
                to: next,
            });
        }

        slot.staged.apply(next, failure, Utc::now());
        Ok(slot.staged.clone())
    }

    async fn get(&self, local_id: &ClientLocalId) -> Result<Option<StagedReport>, StagingError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.slots.get(local_id).map(|s| s.staged.clone()))
    }

    async fn clear_synced(&self, older_than: DateTime<Utc>) -> Result<u64, StagingError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let before = inner.slots.len();
        inner.slots.retain(|_, s| {
            !(s.staged.sync_state == SyncState::Synced && s.staged.updated_at < older_than)
        });
        Ok((before - inner.slots.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use idsr_core::{CaseLocation, CaseReportDraft, CaseStatus, FailureKind, Gender, UserId};

    use super::*;

    fn report(key: &str) -> CaseReport {
        let draft = CaseReportDraft {
            disease_code: "MAL".to_string(),
            age_group: "5-14".to_string(),
            gender: Gender::Male,
            symptoms: vec!["fever".to_string()],
            location: CaseLocation::new("Ward 1"),
            status: CaseStatus::Suspected,
            notes: None,
            attachments: vec![],
            report_date: None,
        };
        CaseReport::from_draft_with_id(
            draft,
            ClientLocalId::new(key).unwrap(),
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    fn key(k: &str) -> ClientLocalId {
        ClientLocalId::new(k).unwrap()
    }

    #[tokio::test]
    async fn stage_starts_pending_and_rejects_duplicates() {
        let store = InMemoryStagingStore::new();
        let staged = store.stage(report("CASE-1")).await.unwrap();
        assert_eq!(staged.sync_state, SyncState::Pending);
        assert_eq!(staged.attempts, 0);

        let err = store.stage(report("CASE-1")).await.unwrap_err();
        assert!(matches!(err, StagingError::AlreadyStaged(id) if id.as_str() == "CASE-1"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn list_is_oldest_first() {
        let store = InMemoryStagingStore::new();
        for k in ["CASE-A", "CASE-B", "CASE-C"] {
            store.stage(report(k)).await.unwrap();
        }
        let ids: Vec<String> = store
            .list_by_state(SyncState::Pending)
            .await
            .unwrap()
            .iter()
            .map(|s| s.local_id().to_string())
            .collect();
        assert_eq!(ids, vec!["CASE-A", "CASE-B", "CASE-C"]);
    }

    #[tokio::test]
    async fn transitions_follow_the_state_machine() {
        let store = InMemoryStagingStore::new();
        store.stage(report("CASE-1")).await.unwrap();

        let err = store
            .update_state(&key("CASE-1"), SyncState::Synced, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StagingError::InvalidTransition { from: SyncState::Pending, to: SyncState::Synced, .. }
        ));

        let claimed = store
            .update_state(&key("CASE-1"), SyncState::Syncing, None)
            .await
            .unwrap();
        assert_eq!(claimed.attempts, 1);

        let failed = store
            .update_state(
                &key("CASE-1"),
                SyncState::Failed,
                Some(SyncFailure::transport("connection reset")),
            )
            .await
            .unwrap();
        assert_eq!(failed.failure.as_ref().map(|f| f.kind), Some(FailureKind::Transport));
        assert!(failed.is_due());

        let retried = store
            .update_state(&key("CASE-1"), SyncState::Pending, None)
            .await
            .unwrap();
        assert!(retried.failure.is_none());
    }

    #[tokio::test]
    async fn validation_failures_are_not_due() {
        let store = InMemoryStagingStore::new();
        store.stage(report("CASE-1")).await.unwrap();
        store.update_state(&key("CASE-1"), SyncState::Syncing, None).await.unwrap();
        let failed = store
            .update_state(
                &key("CASE-1"),
                SyncState::Failed,
                Some(SyncFailure::validation("bad age group")),
            )
            .await
            .unwrap();
        assert!(!failed.is_due());
    }

    #[tokio::test]
    async fn only_one_concurrent_claim_wins() {
        let store = Arc::new(InMemoryStagingStore::new());
        store.stage(report("CASE-1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.update_state(&key("CASE-1"), SyncState::Syncing, None).await.is_ok()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn unknown_record_is_not_found() {
        let store = InMemoryStagingStore::new();
        let err = store
            .update_state(&key("CASE-404"), SyncState::Syncing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::NotFound(_)));
        assert!(store.get(&key("CASE-404")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_synced_only_removes_old_synced_records() {
        let store = InMemoryStagingStore::new();
        store.stage(report("CASE-1")).await.unwrap();
        store.stage(report("CASE-2")).await.unwrap();
        store.update_state(&key("CASE-1"), SyncState::Syncing, None).await.unwrap();
        store.update_state(&key("CASE-1"), SyncState::Synced, None).await.unwrap();

        assert_eq!(store.clear_synced(Utc::now() - Duration::days(7)).await.unwrap(), 0);
        assert_eq!(store.clear_synced(Utc::now() + Duration::seconds(1)).await.unwrap(), 1);
        assert!(store.get(&key("CASE-2")).await.unwrap().is_some());
    }
}
