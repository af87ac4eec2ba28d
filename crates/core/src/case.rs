//! Case report: the unit of surveillance data captured in the field.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{CaseId, ClientLocalId, UserId};

/// Patient gender as captured on the intake form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[serde(alias = "M")]
    Male,
    #[serde(alias = "F")]
    Female,
    #[serde(alias = "O")]
    Other,
    #[serde(alias = "U")]
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::Unknown => "unknown",
        }
    }
}

impl FromStr for Gender {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" | "M" => Ok(Gender::Male),
            "female" | "F" => Ok(Gender::Female),
            "other" | "O" => Ok(Gender::Other),
            "unknown" | "U" => Ok(Gender::Unknown),
            other => Err(DomainError::validation(format!("unknown gender '{other}'"))),
        }
    }
}

/// Workflow stage of a case on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    #[default]
    Suspected,
    Confirmed,
    RuledOut,
    PendingLab,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Suspected => "suspected",
            CaseStatus::Confirmed => "confirmed",
            CaseStatus::RuledOut => "ruled_out",
            CaseStatus::PendingLab => "pending_lab",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the case was observed.
///
/// `detail` is the location descriptor clusters are keyed on. Facility and
/// district are names; they are resolved to remote identifiers at sync time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseLocation {
    pub detail: String,
    #[serde(default)]
    pub facility: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
}

impl CaseLocation {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            facility: None,
            district: None,
        }
    }

    pub fn with_facility(mut self, facility: impl Into<String>) -> Self {
        self.facility = Some(facility.into());
        self
    }

    pub fn with_district(mut self, district: impl Into<String>) -> Self {
        self.district = Some(district.into());
        self
    }
}

/// Opaque reference to an attachment held by the file store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentRef(pub String);

/// Form input for a new case report, before it gets an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReportDraft {
    pub disease_code: String,
    pub age_group: String,
    pub gender: Gender,
    pub symptoms: Vec<String>,
    pub location: CaseLocation,
    #[serde(default)]
    pub status: CaseStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub report_date: Option<DateTime<Utc>>,
}

impl CaseReportDraft {
    /// Intake validation. Runs before staging; the staging store never
    /// re-validates.
    pub fn validate(&self) -> DomainResult<()> {
        if self.disease_code.trim().is_empty() {
            return Err(DomainError::validation("disease code is required"));
        }
        if self.age_group.trim().is_empty() {
            return Err(DomainError::validation("age group is required"));
        }
        if self.location.detail.trim().is_empty() {
            return Err(DomainError::validation("location is required"));
        }
        if self.symptoms.is_empty() {
            return Err(DomainError::validation("at least one symptom is required"));
        }
        if self.symptoms.iter().any(|s| s.trim().is_empty()) {
            return Err(DomainError::validation("symptoms must not be blank"));
        }
        Ok(())
    }
}

/// A case report as held on the device and delivered to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    /// Absent until the remote store has persisted the report.
    pub id: Option<CaseId>,
    pub client_local_id: ClientLocalId,
    pub reporter_id: UserId,
    pub disease_code: String,
    pub age_group: String,
    pub gender: Gender,
    pub symptoms: Vec<String>,
    pub location: CaseLocation,
    pub status: CaseStatus,
    pub notes: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    pub report_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CaseReport {
    /// Validate a draft and mint a fresh idempotency key for it.
    pub fn from_draft(
        draft: CaseReportDraft,
        reporter_id: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::from_draft_with_id(draft, ClientLocalId::generate(), reporter_id, now)
    }

    /// Like [`CaseReport::from_draft`], with a caller-chosen idempotency key.
    pub fn from_draft_with_id(
        draft: CaseReportDraft,
        client_local_id: ClientLocalId,
        reporter_id: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        draft.validate()?;
        Ok(Self {
            id: None,
            client_local_id,
            reporter_id,
            disease_code: draft.disease_code.trim().to_string(),
            age_group: draft.age_group,
            gender: draft.gender,
            symptoms: draft.symptoms,
            location: draft.location,
            status: draft.status,
            notes: draft.notes,
            attachments: draft.attachments,
            report_date: draft.report_date.unwrap_or(now),
            created_at: now,
        })
    }
}
