//! Declared outbreaks.
//!
//! An outbreak only comes into existence through an explicit declaration by an
//! authorized user. Nothing in the pipeline creates one automatically.

use core::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{OutbreakId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutbreakStatus {
    #[default]
    Active,
    Contained,
    Resolved,
}

impl OutbreakStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutbreakStatus::Active => "active",
            OutbreakStatus::Contained => "contained",
            OutbreakStatus::Resolved => "resolved",
        }
    }

    pub fn can_transition_to(self, next: OutbreakStatus) -> bool {
        use OutbreakStatus::*;
        matches!(
            (self, next),
            (Active, Contained) | (Active, Resolved) | (Contained, Resolved)
        )
    }
}

impl fmt::Display for OutbreakStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the human-gated "declare outbreak" write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutbreakDeclaration {
    pub disease_code: String,
    pub location: String,
    pub affected_districts: Vec<String>,
    pub case_count: u32,
    pub start_date: NaiveDate,
    pub status: OutbreakStatus,
    pub declared_by: UserId,
}

impl OutbreakDeclaration {
    pub fn new(
        disease_code: impl Into<String>,
        location: impl Into<String>,
        case_count: u32,
        start_date: NaiveDate,
        declared_by: UserId,
    ) -> DomainResult<Self> {
        let disease_code = disease_code.into();
        let location = location.into();
        if disease_code.trim().is_empty() {
            return Err(DomainError::validation("outbreak disease code is required"));
        }
        if location.trim().is_empty() {
            return Err(DomainError::validation("outbreak location is required"));
        }
        if case_count == 0 {
            return Err(DomainError::invariant("an outbreak needs at least one case"));
        }
        Ok(Self {
            disease_code,
            location,
            affected_districts: Vec::new(),
            case_count,
            start_date,
            status: OutbreakStatus::Active,
            declared_by,
        })
    }

    pub fn with_affected_districts(mut self, districts: Vec<String>) -> Self {
        self.affected_districts = districts;
        self
    }
}

/// A persisted outbreak record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbreak {
    pub id: OutbreakId,
    pub disease_code: String,
    pub location: String,
    #[serde(default)]
    pub affected_districts: Vec<String>,
    pub case_count: u32,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub status: OutbreakStatus,
    pub declared_by: UserId,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Outbreak {
    /// Move the outbreak along its lifecycle. Resolving stamps `end_date`.
    pub fn transition(&mut self, next: OutbreakStatus, today: NaiveDate) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(self.status, next));
        }
        self.status = next;
        if next == OutbreakStatus::Resolved {
            self.end_date = Some(today);
        }
        Ok(())
    }
}
