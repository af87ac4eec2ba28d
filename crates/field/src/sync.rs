//! Delivery of staged case reports to the remote store.
//!
//! At-least-once delivery with at most one effective insert per
//! `client_local_id`:
//! - every record is claimed (`pending -> syncing`) before any remote call,
//!   so overlapping runs never work the same record;
//! - the remote store is asked whether the key already exists before
//!   inserting, and a unique violation on insert counts as delivered.
//!
//! Records are independent: one failure never stops the batch.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use idsr_alerts::{AlertRuleEngine, DiseaseAlert};
use idsr_core::{CaseReport, ClientLocalId, SyncFailure, SyncState};

use crate::remote::{Filter, Record, RemoteError, RemoteStore, tables};
use crate::staging::{StagedReport, StagingError, StagingStore};

/// Default bound on a single remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// Synced records older than this are pruned by [`SyncCoordinator::prune_synced`].
pub const SYNCED_RETENTION_DAYS: i64 = 7;

/// Sink for disease alerts raised after delivery.
///
/// Alerts are escalation signals, not state changes.
pub trait AlertSink: Send + Sync + 'static {
    fn emit(&self, alert: DiseaseAlert);
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    inner: Mutex<Vec<DiseaseAlert>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<DiseaseAlert> {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl AlertSink for InMemoryAlertSink {
    fn emit(&self, alert: DiseaseAlert) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.push(alert);
        }
    }
}

/// Sink that only logs. Default for the coordinator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, alert: DiseaseAlert) {
        tracing::warn!(
            disease_code = %alert.disease_code,
            case_count = alert.case_count,
            threshold = alert.reporting_threshold,
            timeframe = %alert.reporting_timeframe,
            contact_tracing = alert.contact_tracing_required,
            "disease alert: {}",
            alert.explanation
        );
    }
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub failed: usize,
    /// Records another run had already claimed.
    pub skipped: usize,
    pub alerts_raised: usize,
    pub failures: Vec<(ClientLocalId, SyncFailure)>,
}

impl SyncSummary {
    pub fn attempted(&self) -> usize {
        self.synced + self.failed + self.skipped
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("report {local_id} is {state}; only failed reports can be retried")]
    NotRetryable { local_id: ClientLocalId, state: SyncState },
}

enum Delivery {
    Inserted,
    AlreadyPresent,
}

enum Outcome {
    Synced { alert: bool },
    Failed(SyncFailure),
    Skipped,
}

/// Drives staged reports to the remote store.
pub struct SyncCoordinator {
    staging: Arc<dyn StagingStore>,
    remote: Arc<dyn RemoteStore>,
    engine: AlertRuleEngine,
    alerts: Arc<dyn AlertSink>,
    remote_timeout: Duration,
}

impl SyncCoordinator {
    pub fn new(staging: Arc<dyn StagingStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            staging,
            remote,
            engine: AlertRuleEngine::default(),
            alerts: Arc::new(TracingAlertSink),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_rule_engine(mut self, engine: AlertRuleEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn staging(&self) -> &Arc<dyn StagingStore> {
        &self.staging
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Check that the remote store is reachable within the call timeout.
    pub async fn ping(&self) -> Result<(), RemoteError> {
        self.call(self.remote.ping()).await
    }

    /// Stage a new report for delivery.
    pub async fn stage(&self, report: CaseReport) -> Result<StagedReport, SyncError> {
        let staged = self.staging.stage(report).await?;
        tracing::debug!(local_id = %staged.local_id(), "report staged");
        Ok(staged)
    }

    /// Deliver every `pending` report and every auto-retryable `failed` one.
    ///
    /// Only a failure to read the staging store fails the run; per-record
    /// failures are recorded on the record and in the summary.
    pub async fn sync_pending(&self) -> Result<SyncSummary, SyncError> {
        let mut due = self.staging.list_by_state(SyncState::Pending).await?;
        due.extend(
            self.staging
                .list_by_state(SyncState::Failed)
                .await?
                .into_iter()
                .filter(StagedReport::is_due),
        );
        due.sort_by_key(|s| s.staged_at);

        let mut summary = SyncSummary::default();
        if due.is_empty() {
            tracing::debug!("nothing to sync");
            return Ok(summary);
        }
        tracing::info!(count = due.len(), "syncing staged reports");

        for entry in due {
            let local_id = entry.local_id().clone();
            match self.sync_one(entry).await {
                Outcome::Synced { alert } => {
                    summary.synced += 1;
                    if alert {
                        summary.alerts_raised += 1;
                    }
                }
                Outcome::Failed(failure) => {
                    summary.failed += 1;
                    summary.failures.push((local_id, failure));
                }
                Outcome::Skipped => summary.skipped += 1,
            }
        }

        tracing::info!(
            synced = summary.synced,
            failed = summary.failed,
            skipped = summary.skipped,
            alerts = summary.alerts_raised,
            "sync run complete"
        );
        Ok(summary)
    }

    /// Manually move a `failed` report back to `pending`, whatever the kind
    /// of failure.
    pub async fn retry(&self, local_id: &ClientLocalId) -> Result<StagedReport, SyncError> {
        let staged = self
            .staging
            .get(local_id)
            .await?
            .ok_or_else(|| StagingError::NotFound(local_id.clone()))?;
        if staged.sync_state != SyncState::Failed {
            return Err(SyncError::NotRetryable {
                local_id: local_id.clone(),
                state: staged.sync_state,
            });
        }
        let staged = self.staging.update_state(local_id, SyncState::Pending, None).await?;
        tracing::info!(local_id = %local_id, "report queued for retry");
        Ok(staged)
    }

    /// Release `syncing` claims left behind by a run that never finished.
    ///
    /// Only safe while no other run is active (process start-up).
    pub async fn release_stale_claims(&self) -> Result<usize, SyncError> {
        let stale = self.staging.list_by_state(SyncState::Syncing).await?;
        let mut released = 0;
        for entry in stale {
            match self
                .staging
                .update_state(entry.local_id(), SyncState::Pending, None)
                .await
            {
                Ok(_) => released += 1,
                Err(StagingError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if released > 0 {
            tracing::warn!(released, "released stale sync claims");
        }
        Ok(released)
    }

    /// Drop synced records older than the retention period.
    pub async fn prune_synced(&self) -> Result<u64, SyncError> {
        let cutoff = Utc::now() - chrono::Duration::days(SYNCED_RETENTION_DAYS);
        let removed = self.staging.clear_synced(cutoff).await?;
        if removed > 0 {
            tracing::debug!(removed, "pruned synced reports");
        }
        Ok(removed)
    }

    async fn sync_one(&self, entry: StagedReport) -> Outcome {
        let local_id = entry.local_id().clone();

        match self.claim(&entry).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(local_id = %local_id, "already claimed by another run");
                return Outcome::Skipped;
            }
            Err(e) => {
                tracing::error!(local_id = %local_id, error = %e, "failed to claim report");
                return Outcome::Failed(SyncFailure::internal(e.to_string()));
            }
        }

        match self.deliver(&entry.report).await {
            Ok(delivery) => {
                if let Err(e) = self.staging.update_state(&local_id, SyncState::Synced, None).await {
                    // Delivered but not recorded: the existence check settles
                    // it on the next run.
                    tracing::error!(local_id = %local_id, error = %e, "delivered but failed to mark synced");
                    let failure = SyncFailure::internal(e.to_string());
                    self.release_claim(&local_id, failure.clone()).await;
                    return Outcome::Failed(failure);
                }
                match delivery {
                    Delivery::AlreadyPresent => {
                        tracing::info!(local_id = %local_id, "report already present remotely");
                        Outcome::Synced { alert: false }
                    }
                    Delivery::Inserted => {
                        tracing::info!(local_id = %local_id, "report synced");
                        let alert = self.raise_alert(&entry.report).await;
                        Outcome::Synced { alert }
                    }
                }
            }
            Err(err) => {
                let failure = err.to_failure();
                tracing::warn!(local_id = %local_id, error = %err, "report sync failed");
                if let Err(e) = self
                    .staging
                    .update_state(&local_id, SyncState::Failed, Some(failure.clone()))
                    .await
                {
                    tracing::error!(local_id = %local_id, error = %e, "failed to record sync failure");
                    self.release_claim(&local_id, SyncFailure::internal(e.to_string()))
                        .await;
                }
                Outcome::Failed(failure)
            }
        }
    }

    /// Move a claimed record out of `syncing` after its outcome could not be
    /// recorded: `failed` (internal, auto-retried) first, `pending` as a
    /// fallback. Left in `syncing` only if the store refuses both, in which
    /// case the next start-up releases it.
    async fn release_claim(&self, local_id: &ClientLocalId, failure: SyncFailure) {
        let failed = self
            .staging
            .update_state(local_id, SyncState::Failed, Some(failure))
            .await;
        let Err(first) = failed else {
            return;
        };
        if let Err(second) = self.staging.update_state(local_id, SyncState::Pending, None).await {
            tracing::error!(
                local_id = %local_id,
                error = %first,
                fallback_error = %second,
                "could not release sync claim"
            );
        }
    }

    /// `failed -> pending -> syncing`. `Ok(false)` when another run won.
    async fn claim(&self, entry: &StagedReport) -> Result<bool, StagingError> {
        let local_id = entry.local_id();
        if entry.sync_state == SyncState::Failed {
            match self.staging.update_state(local_id, SyncState::Pending, None).await {
                Ok(_) => {}
                Err(StagingError::InvalidTransition { .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        match self.staging.update_state(local_id, SyncState::Syncing, None).await {
            Ok(_) => Ok(true),
            Err(StagingError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn deliver(&self, report: &CaseReport) -> Result<Delivery, RemoteError> {
        let existing = self
            .call(self.remote.query(
                tables::CASE_REPORTS,
                &Filter::new()
                    .eq("client_local_id", report.client_local_id.as_str())
                    .limit(1),
            ))
            .await?;
        if !existing.is_empty() {
            return Ok(Delivery::AlreadyPresent);
        }

        let facility_id = self
            .resolve(tables::FACILITIES, report.location.facility.as_deref())
            .await;
        let district_id = self
            .resolve(tables::DISTRICTS, report.location.district.as_deref())
            .await;

        let row = case_report_row(report, facility_id, district_id);
        match self.call(self.remote.insert(tables::CASE_REPORTS, row)).await {
            Ok(_) => Ok(Delivery::Inserted),
            Err(RemoteError::UniqueViolation(detail)) => {
                tracing::debug!(local_id = %report.client_local_id, %detail, "insert raced a concurrent delivery");
                Ok(Delivery::AlreadyPresent)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort name to id lookup; any miss or error is `null`.
    async fn resolve(&self, table: &str, name: Option<&str>) -> Value {
        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            return Value::Null;
        };
        match self
            .call(self.remote.query(table, &Filter::new().eq("name", name).limit(1)))
            .await
        {
            Ok(rows) => rows
                .into_iter()
                .next()
                .and_then(|mut r| r.remove("id"))
                .unwrap_or(Value::Null),
            Err(e) => {
                tracing::debug!(table, name, error = %e, "reference lookup failed");
                Value::Null
            }
        }
    }

    /// Count recent remote cases of the same disease and escalate on a
    /// threshold breach. Never affects the record's sync state.
    async fn raise_alert(&self, report: &CaseReport) -> bool {
        match self.evaluate_alert(report, Utc::now()).await {
            Ok(Some(alert)) => {
                self.alerts.emit(alert);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    local_id = %report.client_local_id,
                    error = %e,
                    "alert evaluation failed"
                );
                false
            }
        }
    }

    async fn evaluate_alert(
        &self,
        report: &CaseReport,
        now: DateTime<Utc>,
    ) -> Result<Option<DiseaseAlert>, RemoteError> {
        let Some(disease) = self.engine.catalog().get(&report.disease_code) else {
            return Ok(None);
        };
        // Immediate diseases are counted over the last day.
        let window_hours = disease.reporting_timeframe.as_hours().unwrap_or(24);
        let since = now - chrono::Duration::hours(i64::from(window_hours));

        let rows = self
            .call(self.remote.query(
                tables::CASE_REPORTS,
                &Filter::new()
                    .eq("disease_code", report.disease_code.as_str())
                    .gte("report_date", ts(since)),
            ))
            .await?;

        let case_count = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        let oldest = rows
            .iter()
            .filter_map(|r| r.get("report_date").and_then(Value::as_str))
            .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .min()
            .unwrap_or(report.report_date);
        let elapsed_hours = u32::try_from((now - oldest).num_hours().max(0)).unwrap_or(u32::MAX);

        Ok(self.engine.evaluate(&report.disease_code, case_count, elapsed_hours))
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.remote_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.remote_timeout)),
        }
    }
}

pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Remote `case_reports` row for a staged report.
pub fn case_report_row(report: &CaseReport, facility_id: Value, district_id: Value) -> Record {
    let row = json!({
        "client_local_id": report.client_local_id.as_str(),
        "reporter_id": report.reporter_id.to_string(),
        "disease_code": report.disease_code,
        "age_group": report.age_group,
        "gender": report.gender.as_str(),
        "symptoms": report.symptoms,
        "location_detail": report.location.detail,
        "facility_id": facility_id,
        "district_id": district_id,
        "status": report.status.as_str(),
        "notes": report.notes,
        "attachments": report.attachments,
        "report_date": ts(report.report_date),
        "sync_status": SyncState::Synced.as_str(),
    });
    match row {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use idsr_core::{CaseLocation, CaseReportDraft, CaseStatus, FailureKind, Gender, UserId};

    use super::*;
    use crate::remote::InMemoryRemoteStore;
    use crate::staging::InMemoryStagingStore;

    fn report(key: &str, code: &str) -> CaseReport {
        let draft = CaseReportDraft {
            disease_code: code.to_string(),
            age_group: "15-49".to_string(),
            gender: Gender::Female,
            symptoms: vec!["fever".to_string(), "chills".to_string()],
            location: CaseLocation::new("Ward 4")
                .with_facility("Central HC")
                .with_district("Central"),
            status: CaseStatus::Suspected,
            notes: None,
            attachments: vec![],
            report_date: None,
        };
        CaseReport::from_draft_with_id(draft, ClientLocalId::new(key).unwrap(), UserId::new(), Utc::now())
            .unwrap()
    }

    fn key(k: &str) -> ClientLocalId {
        ClientLocalId::new(k).unwrap()
    }

    fn setup() -> (Arc<InMemoryStagingStore>, Arc<InMemoryRemoteStore>, SyncCoordinator) {
        let staging = Arc::new(InMemoryStagingStore::new());
        let remote = Arc::new(InMemoryRemoteStore::new().with_unique(tables::CASE_REPORTS, "client_local_id"));
        let coordinator = SyncCoordinator::new(staging.clone(), remote.clone());
        (staging, remote, coordinator)
    }

    #[tokio::test]
    async fn empty_staging_is_a_no_op() {
        let (_, remote, coordinator) = setup();
        let summary = coordinator.sync_pending().await.unwrap();
        assert_eq!(summary, SyncSummary::default());
        assert_eq!(remote.count(tables::CASE_REPORTS), 0);
    }

    #[tokio::test]
    async fn resolves_references_best_effort() {
        let (_, remote, coordinator) = setup();
        let facility = remote
            .insert(tables::FACILITIES, json!({ "name": "Central HC" }).as_object().cloned().unwrap())
            .await
            .unwrap();

        coordinator.stage(report("CASE-1", "MAL")).await.unwrap();
        coordinator.sync_pending().await.unwrap();

        let row = &remote.rows(tables::CASE_REPORTS)[0];
        assert_eq!(row.get("facility_id"), facility.get("id"));
        // No district row: resolved to null, insert still happens.
        assert_eq!(row.get("district_id"), Some(&Value::Null));
        assert_eq!(row.get("location_detail"), Some(&json!("Ward 4")));
    }

    #[tokio::test]
    async fn existing_remote_row_is_not_inserted_again() {
        let (staging, remote, coordinator) = setup();
        let r = report("CASE-1", "MAL");
        remote
            .insert(tables::CASE_REPORTS, case_report_row(&r, Value::Null, Value::Null))
            .await
            .unwrap();

        coordinator.stage(r).await.unwrap();
        let summary = coordinator.sync_pending().await.unwrap();
        assert_eq!(summary.synced, 1);
        assert_eq!(remote.count(tables::CASE_REPORTS), 1);
        let staged = staging.get(&key("CASE-1")).await.unwrap().unwrap();
        assert_eq!(staged.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn retry_only_applies_to_failed_reports() {
        let (staging, _, coordinator) = setup();
        coordinator.stage(report("CASE-1", "MAL")).await.unwrap();

        let err = coordinator.retry(&key("CASE-1")).await.unwrap_err();
        assert!(matches!(err, SyncError::NotRetryable { state: SyncState::Pending, .. }));

        staging.update_state(&key("CASE-1"), SyncState::Syncing, None).await.unwrap();
        staging
            .update_state(&key("CASE-1"), SyncState::Failed, Some(SyncFailure::validation("rejected")))
            .await
            .unwrap();

        // Validation failures wait for a manual retry.
        let summary = coordinator.sync_pending().await.unwrap();
        assert_eq!(summary.attempted(), 0);

        let retried = coordinator.retry(&key("CASE-1")).await.unwrap();
        assert_eq!(retried.sync_state, SyncState::Pending);
        assert_eq!(coordinator.sync_pending().await.unwrap().synced, 1);

        let missing = coordinator.retry(&key("CASE-404")).await.unwrap_err();
        assert!(matches!(missing, SyncError::Staging(StagingError::NotFound(_))));
    }

    #[tokio::test]
    async fn transport_failures_retry_on_the_next_run() {
        let (staging, _, coordinator) = setup();
        coordinator.stage(report("CASE-1", "MAL")).await.unwrap();
        staging.update_state(&key("CASE-1"), SyncState::Syncing, None).await.unwrap();
        staging
            .update_state(&key("CASE-1"), SyncState::Failed, Some(SyncFailure::transport("offline")))
            .await
            .unwrap();

        let summary = coordinator.sync_pending().await.unwrap();
        assert_eq!(summary.synced, 1);
        let staged = staging.get(&key("CASE-1")).await.unwrap().unwrap();
        assert_eq!(staged.attempts, 2);
        assert!(staged.failure.is_none());
    }

    #[tokio::test]
    async fn stale_claims_are_released() {
        let (staging, _, coordinator) = setup();
        coordinator.stage(report("CASE-1", "MAL")).await.unwrap();
        staging.update_state(&key("CASE-1"), SyncState::Syncing, None).await.unwrap();

        // A claimed record is invisible to a run until released.
        assert_eq!(coordinator.sync_pending().await.unwrap().attempted(), 0);
        assert_eq!(coordinator.release_stale_claims().await.unwrap(), 1);
        assert_eq!(coordinator.sync_pending().await.unwrap().synced, 1);
    }

    #[tokio::test]
    async fn threshold_breach_emits_an_alert() {
        let (_, _, coordinator) = setup();
        let sink = Arc::new(InMemoryAlertSink::new());
        let coordinator = coordinator.with_alert_sink(sink.clone());

        // CHOL alerts on the first case.
        coordinator.stage(report("CASE-1", "CHOL")).await.unwrap();
        // MAL needs 10 cases in 7 days.
        coordinator.stage(report("CASE-2", "MAL")).await.unwrap();
        let summary = coordinator.sync_pending().await.unwrap();

        assert_eq!(summary.synced, 2);
        assert_eq!(summary.alerts_raised, 1);
        let alerts = sink.all();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].disease_code, "CHOL");
        assert_eq!(alerts[0].case_count, 1);
    }

    #[tokio::test]
    async fn rejected_insert_is_a_validation_failure() {
        struct Rejecting;

        #[async_trait::async_trait]
        impl RemoteStore for Rejecting {
            async fn insert(&self, _: &str, _: Record) -> Result<Record, RemoteError> {
                Err(RemoteError::Rejected("age_group: invalid".into()))
            }
            async fn query(&self, _: &str, _: &Filter) -> Result<Vec<Record>, RemoteError> {
                Ok(vec![])
            }
            async fn update(&self, _: &str, _: &Filter, _: Record) -> Result<Vec<Record>, RemoteError> {
                Ok(vec![])
            }
            async fn ping(&self) -> Result<(), RemoteError> {
                Ok(())
            }
        }

        let staging = Arc::new(InMemoryStagingStore::new());
        let coordinator = SyncCoordinator::new(staging.clone(), Arc::new(Rejecting));
        coordinator.stage(report("CASE-1", "MAL")).await.unwrap();

        let summary = coordinator.sync_pending().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].1.kind, FailureKind::Validation);
        let staged = staging.get(&key("CASE-1")).await.unwrap().unwrap();
        assert_eq!(staged.sync_state, SyncState::Failed);
        assert!(!staged.is_due());
    }

    /// Staging store whose first write of `fail_on` errors.
    struct LockedOnce {
        inner: InMemoryStagingStore,
        fail_on: SyncState,
        tripped: std::sync::atomic::AtomicBool,
    }

    impl LockedOnce {
        fn new(fail_on: SyncState) -> Self {
            Self {
                inner: InMemoryStagingStore::new(),
                fail_on,
                tripped: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl StagingStore for LockedOnce {
        async fn stage(&self, report: CaseReport) -> Result<StagedReport, StagingError> {
            self.inner.stage(report).await
        }
        async fn list_by_state(&self, state: SyncState) -> Result<Vec<StagedReport>, StagingError> {
            self.inner.list_by_state(state).await
        }
        async fn update_state(
            &self,
            local_id: &ClientLocalId,
            next: SyncState,
            failure: Option<SyncFailure>,
        ) -> Result<StagedReport, StagingError> {
            if next == self.fail_on && !self.tripped.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(StagingError::Storage("database is locked".into()));
            }
            self.inner.update_state(local_id, next, failure).await
        }
        async fn get(&self, local_id: &ClientLocalId) -> Result<Option<StagedReport>, StagingError> {
            self.inner.get(local_id).await
        }
        async fn clear_synced(&self, older_than: DateTime<Utc>) -> Result<u64, StagingError> {
            self.inner.clear_synced(older_than).await
        }
    }

    #[tokio::test]
    async fn unrecorded_delivery_is_released_and_settled_next_run() {
        let staging = Arc::new(LockedOnce::new(SyncState::Synced));
        let remote = Arc::new(InMemoryRemoteStore::new().with_unique(tables::CASE_REPORTS, "client_local_id"));
        let coordinator = SyncCoordinator::new(staging.clone(), remote.clone());
        coordinator.stage(report("CASE-1", "MAL")).await.unwrap();

        let first = coordinator.sync_pending().await.unwrap();
        assert_eq!(first.synced, 0);
        assert_eq!(first.failed, 1);
        assert_eq!(first.failures[0].1.kind, FailureKind::Internal);
        let staged = staging.get(&key("CASE-1")).await.unwrap().unwrap();
        assert_eq!(staged.sync_state, SyncState::Failed);
        assert!(staged.is_due());

        let second = coordinator.sync_pending().await.unwrap();
        assert_eq!(second.synced, 1);
        assert_eq!(remote.count(tables::CASE_REPORTS), 1);
        let staged = staging.get(&key("CASE-1")).await.unwrap().unwrap();
        assert_eq!(staged.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn unrecorded_failure_releases_the_claim() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl RemoteStore for Unreachable {
            async fn insert(&self, _: &str, _: Record) -> Result<Record, RemoteError> {
                Err(RemoteError::Transport("no route to host".into()))
            }
            async fn query(&self, _: &str, _: &Filter) -> Result<Vec<Record>, RemoteError> {
                Ok(vec![])
            }
            async fn update(&self, _: &str, _: &Filter, _: Record) -> Result<Vec<Record>, RemoteError> {
                Ok(vec![])
            }
            async fn ping(&self) -> Result<(), RemoteError> {
                Ok(())
            }
        }

        let staging = Arc::new(LockedOnce::new(SyncState::Failed));
        let coordinator = SyncCoordinator::new(staging.clone(), Arc::new(Unreachable));
        coordinator.stage(report("CASE-1", "MAL")).await.unwrap();

        let summary = coordinator.sync_pending().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].1.kind, FailureKind::Transport);

        let staged = staging.get(&key("CASE-1")).await.unwrap().unwrap();
        assert_eq!(staged.sync_state, SyncState::Failed);
        assert_eq!(staged.failure.as_ref().map(|f| f.kind), Some(FailureKind::Internal));
        assert!(staged.is_due());
        assert_eq!(coordinator.sync_pending().await.unwrap().attempted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_times_out_per_record() {
        struct Hanging;

        #[async_trait::async_trait]
        impl RemoteStore for Hanging {
            async fn insert(&self, _: &str, r: Record) -> Result<Record, RemoteError> {
                Ok(r)
            }
            async fn query(&self, _: &str, _: &Filter) -> Result<Vec<Record>, RemoteError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            }
            async fn update(&self, _: &str, _: &Filter, _: Record) -> Result<Vec<Record>, RemoteError> {
                Ok(vec![])
            }
            async fn ping(&self) -> Result<(), RemoteError> {
                Ok(())
            }
        }

        let staging = Arc::new(InMemoryStagingStore::new());
        let coordinator = SyncCoordinator::new(staging.clone(), Arc::new(Hanging))
            .with_remote_timeout(Duration::from_secs(2));
        coordinator.stage(report("CASE-1", "MAL")).await.unwrap();
        coordinator.stage(report("CASE-2", "MAL")).await.unwrap();

        let summary = coordinator.sync_pending().await.unwrap();
        assert_eq!(summary.failed, 2);
        assert!(summary.failures.iter().all(|(_, f)| f.kind == FailureKind::Transport));
    }
}
