//! Outbreak cluster queries and the human-gated outbreak writes.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};
use thiserror::Error;

use idsr_alerts::{CaseRecord, ClusterCandidate, OutbreakClusterDetector};
use idsr_core::{CaseStatus, DomainError, Outbreak, OutbreakDeclaration, OutbreakId, OutbreakStatus, UserId};

use crate::remote::{Filter, Record, RemoteError, RemoteStore, tables};
use crate::sync::ts;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("outbreak {0} not found")]
    NotFound(OutbreakId),

    #[error("malformed {table} row: {reason}")]
    Malformed { table: &'static str, reason: String },
}

/// Query confirmed cases in the detector's window and run the detector.
///
/// Rows that cannot be read as cases are skipped.
pub async fn fetch_cluster_candidates(
    remote: &dyn RemoteStore,
    detector: &OutbreakClusterDetector,
    now: DateTime<Utc>,
) -> Result<Vec<ClusterCandidate>, ClusterError> {
    let filter = Filter::new()
        .eq("status", CaseStatus::Confirmed.as_str())
        .gte("report_date", ts(detector.window_start(now)));
    let rows = remote.query(tables::CASE_REPORTS, &filter).await?;

    let cases: Vec<CaseRecord> = rows
        .iter()
        .filter_map(|row| match case_record(row) {
            Ok(case) => Some(case),
            Err(reason) => {
                tracing::warn!(%reason, "skipping unreadable case row");
                None
            }
        })
        .collect();

    let candidates = detector.detect(&cases, now);
    tracing::debug!(cases = cases.len(), candidates = candidates.len(), "cluster detection");
    Ok(candidates)
}

fn case_record(row: &Record) -> Result<CaseRecord, String> {
    let disease_code = row
        .get("disease_code")
        .and_then(Value::as_str)
        .ok_or("missing disease_code")?
        .to_string();
    let location = row
        .get("location_detail")
        .and_then(Value::as_str)
        .map(str::to_string);
    let status: CaseStatus = row
        .get("status")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| format!("bad status: {e}"))?
        .unwrap_or_default();
    let reported_at = row
        .get("report_date")
        .and_then(Value::as_str)
        .ok_or("missing report_date")?;
    let reported_at = DateTime::parse_from_rfc3339(reported_at)
        .map_err(|e| format!("bad report_date: {e}"))?
        .with_timezone(&Utc);

    Ok(CaseRecord {
        disease_code,
        location,
        status,
        reported_at,
    })
}

/// Persist a reviewed declaration to `outbreaks`.
pub async fn declare(
    remote: &dyn RemoteStore,
    declaration: OutbreakDeclaration,
) -> Result<Outbreak, ClusterError> {
    let row = to_record(json!({
        "disease_code": declaration.disease_code,
        "location": declaration.location,
        "affected_districts": declaration.affected_districts,
        "case_count": declaration.case_count,
        "start_date": declaration.start_date,
        "status": declaration.status,
        "declared_by": declaration.declared_by,
    }));
    let stored = remote.insert(tables::OUTBREAKS, row).await?;
    let outbreak = outbreak_from_row(stored)?;
    tracing::info!(
        outbreak_id = %outbreak.id,
        disease_code = %outbreak.disease_code,
        location = %outbreak.location,
        case_count = outbreak.case_count,
        declared_by = %outbreak.declared_by,
        "outbreak declared"
    );
    Ok(outbreak)
}

/// Declare an outbreak from a detector candidate. Explicit human action.
pub async fn declare_outbreak(
    remote: &dyn RemoteStore,
    candidate: ClusterCandidate,
    declared_by: UserId,
) -> Result<Outbreak, ClusterError> {
    declare(remote, candidate.into_declaration(declared_by)?).await
}

/// Declared outbreaks, optionally restricted to one status.
pub async fn list_outbreaks(
    remote: &dyn RemoteStore,
    status: Option<OutbreakStatus>,
) -> Result<Vec<Outbreak>, ClusterError> {
    let filter = match status {
        Some(s) => Filter::new().eq("status", s.as_str()),
        None => Filter::new(),
    };
    remote
        .query(tables::OUTBREAKS, &filter)
        .await?
        .into_iter()
        .map(outbreak_from_row)
        .collect()
}

/// Move an outbreak along its lifecycle; resolving stamps `end_date = today`.
pub async fn update_outbreak_status(
    remote: &dyn RemoteStore,
    id: OutbreakId,
    next: OutbreakStatus,
    today: NaiveDate,
) -> Result<Outbreak, ClusterError> {
    let by_id = Filter::new().eq("id", id.to_string()).limit(1);
    let row = remote
        .query(tables::OUTBREAKS, &by_id)
        .await?
        .into_iter()
        .next()
        .ok_or(ClusterError::NotFound(id))?;

    let mut outbreak = outbreak_from_row(row)?;
    outbreak.transition(next, today)?;

    let patch = to_record(json!({
        "status": outbreak.status,
        "end_date": outbreak.end_date,
    }));
    let updated = remote
        .update(tables::OUTBREAKS, &by_id, patch)
        .await?
        .into_iter()
        .next()
        .ok_or(ClusterError::NotFound(id))?;
    outbreak_from_row(updated)
}

fn outbreak_from_row(row: Record) -> Result<Outbreak, ClusterError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| ClusterError::Malformed {
        table: tables::OUTBREAKS,
        reason: e.to_string(),
    })
}

fn to_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}
