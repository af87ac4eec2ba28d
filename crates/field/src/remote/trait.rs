use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use idsr_core::SyncFailure;

/// One row of a remote table.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Eq,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

impl Condition {
    fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(&self.column) else {
            return false;
        };
        match self.op {
            Op::Eq => actual == &self.value,
            Op::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Ordering used by `gte`: numbers numerically, RFC 3339 strings as instants,
/// other strings lexically. Mixed or non-scalar values never compare.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (parse_instant(a), parse_instant(b)) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => Some(a.as_str().cmp(b.as_str())),
            }
        }
        _ => None,
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Conjunction of column conditions, with an optional row limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            op: Op::Eq,
            value: value.into(),
        });
        self
    }

    pub fn gte(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            op: Op::Gte,
            value: value.into(),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Remote store operation error.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The request did not get a usable answer (network, 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote store understood the request and refused it.
    #[error("rejected by remote store: {0}")]
    Rejected(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
}

impl RemoteError {
    /// Classify for the staging record. Only transport problems retry on their own.
    pub fn to_failure(&self) -> SyncFailure {
        match self {
            RemoteError::Transport(_) | RemoteError::Timeout(_) => SyncFailure::transport(self.to_string()),
            RemoteError::Rejected(_) | RemoteError::UniqueViolation(_) => {
                SyncFailure::validation(self.to_string())
            }
        }
    }
}

/// Opaque create/read/update table service.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert one row and return it as stored (with server-assigned columns).
    async fn insert(&self, table: &str, record: Record) -> Result<Record, RemoteError>;

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, RemoteError>;

    /// Merge `patch` into every matching row; returns the updated rows.
    async fn update(&self, table: &str, filter: &Filter, patch: Record) -> Result<Vec<Record>, RemoteError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), RemoteError>;
}

#[async_trait]
impl<S> RemoteStore for Arc<S>
where
    S: RemoteStore + ?Sized,
{
    async fn insert(&self, table: &str, record: Record) -> Result<Record, RemoteError> {
        (**self).insert(table, record).await
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, RemoteError> {
        (**self).query(table, filter).await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Record) -> Result<Vec<Record>, RemoteError> {
        (**self).update(table, filter, patch).await
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        (**self).ping().await
    }
}
