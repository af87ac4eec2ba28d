//! Delivery state of a staged case report.
//!
//! ```text
//! pending ──► syncing ──► synced
//!    ▲           │
//!    │           └──────► failed
//!    └───────────────────────┘ (retry)
//! ```
//!
//! `syncing -> pending` additionally exists to release a claim left behind by a
//! run that never finished (process killed mid-sync).

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Sync state of a staged report. Owned exclusively by the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
            SyncState::Failed => "failed",
        }
    }

    /// `synced` is the only state a record never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Synced)
    }

    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Pending, Syncing)
                | (Syncing, Synced)
                | (Syncing, Failed)
                | (Syncing, Pending)
                | (Failed, Pending)
        )
    }

    /// States a record must currently be in to move to `next`.
    pub fn predecessors(next: SyncState) -> &'static [SyncState] {
        use SyncState::*;
        match next {
            Pending => &[Syncing, Failed],
            Syncing => &[Pending],
            Synced => &[Syncing],
            Failed => &[Syncing],
        }
    }

    pub fn check_transition(self, next: SyncState) -> DomainResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self, next))
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncState::Pending),
            "syncing" => Ok(SyncState::Syncing),
            "synced" => Ok(SyncState::Synced),
            "failed" => Ok(SyncState::Failed),
            other => Err(DomainError::validation(format!("unknown sync state '{other}'"))),
        }
    }
}

/// Why a delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network/transport failure or timeout.
    Transport,
    /// The remote store rejected the record (schema/validation).
    Validation,
    /// Local bookkeeping failed mid-delivery.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Validation => "validation",
            FailureKind::Internal => "internal",
        }
    }

    /// Whether the next scheduled sync run may retry without user action.
    pub fn is_auto_retryable(&self) -> bool {
        !matches!(self, FailureKind::Validation)
    }
}

impl FromStr for FailureKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport" => Ok(FailureKind::Transport),
            "validation" => Ok(FailureKind::Validation),
            "internal" => Ok(FailureKind::Internal),
            other => Err(DomainError::validation(format!("unknown failure kind '{other}'"))),
        }
    }
}

/// Failure recorded on a staged report in state `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SyncFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}
