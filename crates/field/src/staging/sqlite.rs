//! SQLite-backed staging store.
//!
//! Reports live in a single `staged_reports` table. The report itself is a
//! JSON column; delivery bookkeeping gets its own columns so that state
//! queries and the compare-and-set update stay in SQL.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use idsr_core::{CaseReport, ClientLocalId, FailureKind, SyncFailure, SyncState};

use super::r#trait::{StagedReport, StagingError, StagingStore};

/// SQLite-backed staging store.
///
/// This struct is cheap to clone and is safe to share across threads.
#[derive(Debug, Clone)]
pub struct SqliteStagingStore {
    pool: SqlitePool,
}

impl SqliteStagingStore {
    /// Open (creating if needed) the staging database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create staging directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open staging database at {:?}", path))?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "staging database ready");
        Ok(store)
    }

    /// Open the staging database at [`default_db_path`].
    pub async fn open_default() -> anyhow::Result<Self> {
        Self::open(default_db_path()?).await
    }

    /// Private in-memory database (tests/dev).
    ///
    /// A single connection that never expires, so the database lives as long
    /// as the store.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory staging database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS staged_reports (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                client_local_id  TEXT NOT NULL UNIQUE,
                report           TEXT NOT NULL,
                sync_state       TEXT NOT NULL,
                failure_kind     TEXT NULL,
                failure_message  TEXT NULL,
                attempts         INTEGER NOT NULL DEFAULT 0,
                staged_at        TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create staged_reports table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS staged_reports_state_idx
                ON staged_reports (sync_state, staged_at, seq)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create staged_reports index")?;

        Ok(())
    }

    async fn fetch(&self, local_id: &ClientLocalId) -> Result<Option<StagedReport>, StagingError> {
        let row = sqlx::query(
            r#"
            SELECT report, sync_state, failure_kind, failure_message, attempts, staged_at, updated_at
            FROM staged_reports
            WHERE client_local_id = ?1
            "#,
        )
        .bind(local_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(row_to_staged).transpose().map_err(storage)
    }
}

#[async_trait]
impl StagingStore for SqliteStagingStore {
    async fn stage(&self, report: CaseReport) -> Result<StagedReport, StagingError> {
        let staged = StagedReport::new(report, now());
        let payload = serde_json::to_string(&staged.report)
            .map_err(|e| StagingError::Storage(format!("failed to encode report: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO staged_reports (
                client_local_id,
                report,
                sync_state,
                failure_kind,
                failure_message,
                attempts,
                staged_at,
                updated_at
            )
            VALUES (?1, ?2, ?3, NULL, NULL, 0, ?4, ?4)
            "#,
        )
        .bind(staged.local_id().as_str())
        .bind(payload)
        .bind(staged.sync_state.as_str())
        .bind(ts(staged.staged_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(staged),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StagingError::AlreadyStaged(staged.report.client_local_id))
            }
            Err(e) => Err(map_sqlx_error("stage", e)),
        }
    }

    async fn list_by_state(&self, state: SyncState) -> Result<Vec<StagedReport>, StagingError> {
        let rows = sqlx::query(
            r#"
            SELECT report, sync_state, failure_kind, failure_message, attempts, staged_at, updated_at
            FROM staged_reports
            WHERE sync_state = ?1
            ORDER BY staged_at ASC, seq ASC
            "#,
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_state", e))?;

        rows.into_iter()
            .map(|row| row_to_staged(row).map_err(storage))
            .collect()
    }

    async fn update_state(
        &self,
        local_id: &ClientLocalId,
        next: SyncState,
        failure: Option<SyncFailure>,
    ) -> Result<StagedReport, StagingError> {
        let mut staged = self
            .fetch(local_id)
            .await?
            .ok_or_else(|| StagingError::NotFound(local_id.clone()))?;

        let current = staged.sync_state;
        if !current.can_transition_to(next) {
            return Err(StagingError::InvalidTransition {
                local_id: local_id.clone(),
                from: current,
                to: next,
            });
        }

        staged.apply(next, failure, now());
        let (kind, message) = match &staged.failure {
            Some(f) => (Some(f.kind.as_str()), Some(f.message.as_str())),
            None => (None, None),
        };

        // Compare-and-set: only applies if nobody moved the record since the read.
        let result = sqlx::query(
            r#"
            UPDATE staged_reports
            SET sync_state = ?3,
                failure_kind = ?4,
                failure_message = ?5,
                attempts = ?6,
                updated_at = ?7
            WHERE client_local_id = ?1
              AND sync_state = ?2
            "#,
        )
        .bind(local_id.as_str())
        .bind(current.as_str())
        .bind(next.as_str())
        .bind(kind)
        .bind(message)
        .bind(i64::from(staged.attempts))
        .bind(ts(staged.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_state", e))?;

        if result.rows_affected() == 0 {
            let latest = self
                .fetch(local_id)
                .await?
                .ok_or_else(|| StagingError::NotFound(local_id.clone()))?;
            return Err(StagingError::InvalidTransition {
                local_id: local_id.clone(),
                from: latest.sync_state,
                to: next,
            });
        }

        Ok(staged)
    }

    async fn get(&self, local_id: &ClientLocalId) -> Result<Option<StagedReport>, StagingError> {
        self.fetch(local_id).await
    }

    async fn clear_synced(&self, older_than: DateTime<Utc>) -> Result<u64, StagingError> {
        let result = sqlx::query(
            r#"
            DELETE FROM staged_reports
            WHERE sync_state = 'synced'
              AND updated_at < ?1
            "#,
        )
        .bind(ts(older_than))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("clear_synced", e))?;

        Ok(result.rows_affected())
    }
}

/// Timestamps are stored at microsecond precision so that values read back
/// compare equal to the ones written.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339, so lexical order in SQL matches time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, value: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid {column} in staged_reports"))
}

fn storage(err: anyhow::Error) -> StagingError {
    StagingError::Storage(format!("{err:#}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StagingError {
    match err {
        sqlx::Error::Database(db_err) => {
            StagingError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StagingError::Storage(format!("connection pool closed in {}", operation))
        }
        other => StagingError::Storage(format!("{} failed: {}", operation, other)),
    }
}

/// Map a database row into a `StagedReport`.
fn row_to_staged(row: SqliteRow) -> anyhow::Result<StagedReport> {
    let report_str: String = row.try_get("report")?;
    let report: CaseReport =
        serde_json::from_str(&report_str).context("invalid report JSON in staged_reports")?;

    let state_str: String = row.try_get("sync_state")?;
    let sync_state = SyncState::from_str(&state_str)
        .map_err(|e| anyhow::anyhow!("invalid sync_state in staged_reports: {e}"))?;

    let kind: Option<String> = row.try_get("failure_kind")?;
    let message: Option<String> = row.try_get("failure_message")?;
    let failure = match kind {
        Some(kind) => {
            let kind = FailureKind::from_str(&kind)
                .map_err(|e| anyhow::anyhow!("invalid failure_kind in staged_reports: {e}"))?;
            Some(SyncFailure::new(kind, message.unwrap_or_default()))
        }
        None => None,
    };

    let attempts: i64 = row.try_get("attempts")?;
    let attempts = u32::try_from(attempts).context("invalid attempts in staged_reports")?;

    let staged_at: String = row.try_get("staged_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(StagedReport {
        report,
        sync_state,
        failure,
        attempts,
        staged_at: parse_ts("staged_at", &staged_at)?,
        updated_at: parse_ts("updated_at", &updated_at)?,
    })
}

/// Resolve the default path of the staging database:
/// `{data_dir}/idsr/staging.db`.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("idsr");
    path.push("staging.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use idsr_core::{CaseLocation, CaseReportDraft, CaseStatus, Gender, UserId};

    use super::*;

    fn report(key: &str) -> CaseReport {
        let draft = CaseReportDraft {
            disease_code: "CHOL".to_string(),
            age_group: "15-49".to_string(),
            gender: Gender::Female,
            symptoms: vec!["acute_watery_diarrhea".to_string(), "vomiting".to_string()],
            location: CaseLocation::new("Riverside").with_facility("Riverside HC"),
            status: CaseStatus::Suspected,
            notes: Some("household contact".to_string()),
            attachments: vec![],
            report_date: None,
        };
        CaseReport::from_draft_with_id(draft, ClientLocalId::new(key).unwrap(), UserId::new(), Utc::now())
            .unwrap()
    }

    fn key(k: &str) -> ClientLocalId {
        ClientLocalId::new(k).unwrap()
    }

    #[tokio::test]
    async fn staged_report_round_trips() {
        let store = SqliteStagingStore::in_memory().await.unwrap();
        let staged = store.stage(report("CASE-1")).await.unwrap();
        let loaded = store.get(&key("CASE-1")).await.unwrap().unwrap();
        assert_eq!(loaded, staged);
    }

    #[tokio::test]
    async fn duplicate_key_is_already_staged() {
        let store = SqliteStagingStore::in_memory().await.unwrap();
        store.stage(report("CASE-1")).await.unwrap();
        let err = store.stage(report("CASE-1")).await.unwrap_err();
        assert!(matches!(err, StagingError::AlreadyStaged(_)));
    }

    #[tokio::test]
    async fn failure_is_persisted_and_cleared() {
        let store = SqliteStagingStore::in_memory().await.unwrap();
        store.stage(report("CASE-1")).await.unwrap();
        store.update_state(&key("CASE-1"), SyncState::Syncing, None).await.unwrap();
        store
            .update_state(&key("CASE-1"), SyncState::Failed, Some(SyncFailure::validation("age_group")))
            .await
            .unwrap();

        let failed = store.list_by_state(SyncState::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure, Some(SyncFailure::validation("age_group")));
        assert_eq!(failed[0].attempts, 1);

        let pending = store.update_state(&key("CASE-1"), SyncState::Pending, None).await.unwrap();
        assert!(pending.failure.is_none());
        assert!(store.get(&key("CASE-1")).await.unwrap().unwrap().failure.is_none());
    }

    #[tokio::test]
    async fn second_claim_loses() {
        let store = SqliteStagingStore::in_memory().await.unwrap();
        store.stage(report("CASE-1")).await.unwrap();
        store.update_state(&key("CASE-1"), SyncState::Syncing, None).await.unwrap();
        let err = store
            .update_state(&key("CASE-1"), SyncState::Syncing, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StagingError::InvalidTransition { from: SyncState::Syncing, to: SyncState::Syncing, .. }
        ));
    }

    #[tokio::test]
    async fn list_orders_by_staging_time() {
        let store = SqliteStagingStore::in_memory().await.unwrap();
        for k in ["CASE-A", "CASE-B", "CASE-C"] {
            store.stage(report(k)).await.unwrap();
        }
        store.update_state(&key("CASE-B"), SyncState::Syncing, None).await.unwrap();

        let pending: Vec<String> = store
            .list_by_state(SyncState::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.local_id().to_string())
            .collect();
        assert_eq!(pending, vec!["CASE-A", "CASE-C"]);
    }

    #[tokio::test]
    async fn clear_synced_respects_cutoff() {
        let store = SqliteStagingStore::in_memory().await.unwrap();
        store.stage(report("CASE-1")).await.unwrap();
        store.update_state(&key("CASE-1"), SyncState::Syncing, None).await.unwrap();
        store.update_state(&key("CASE-1"), SyncState::Synced, None).await.unwrap();

        let week_ago = Utc::now() - ChronoDuration::days(7);
        assert_eq!(store.clear_synced(week_ago).await.unwrap(), 0);
        let later = Utc::now() + ChronoDuration::seconds(1);
        assert_eq!(store.clear_synced(later).await.unwrap(), 1);
        assert!(store.get(&key("CASE-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("idsr-staging-{}", uuid::Uuid::now_v7()));
        let path = dir.join("staging.db");
        {
            let store = SqliteStagingStore::open(&path).await.unwrap();
            store.stage(report("CASE-1")).await.unwrap();
        }
        let store = SqliteStagingStore::open(&path).await.unwrap();
        assert_eq!(store.list_by_state(SyncState::Pending).await.unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn default_path_ends_with_idsr_staging_db() {
        if let Ok(path) = default_db_path() {
            assert!(path.ends_with("idsr/staging.db"));
        }
    }
}
