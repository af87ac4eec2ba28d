use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::r#trait::{Filter, Record, RemoteError, RemoteStore};

/// In-memory remote store.
///
/// Intended for tests/dev. Tables spring into existence on first insert.
/// Every inserted row gets an `id` and a `created_at` unless it already has
/// them. Unique columns are opt-in per table.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    unique: HashMap<String, HashSet<String>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce uniqueness of non-null values of `column` in `table`.
    pub fn with_unique(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.unique.entry(table.into()).or_default().insert(column.into());
        self
    }

    /// Snapshot of every row in `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .map(|t| t.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn count(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|t| t.get(table).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

fn poisoned() -> RemoteError {
    RemoteError::Transport("lock poisoned".to_string())
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn insert(&self, table: &str, mut record: Record) -> Result<Record, RemoteError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let rows = tables.entry(table.to_string()).or_default();

        if let Some(columns) = self.unique.get(table) {
            for column in columns {
                let Some(value) = record.get(column).filter(|v| !v.is_null()) else {
                    continue;
                };
                if rows.iter().any(|r| r.get(column) == Some(value)) {
                    return Err(RemoteError::UniqueViolation(format!(
                        "{table}.{column} = {value}"
                    )));
                }
            }
        }

        record
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::now_v7().to_string()));
        record.entry("created_at").or_insert_with(|| {
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        });

        rows.push(record.clone());
        Ok(record)
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, RemoteError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        let hits = rows.iter().filter(|r| filter.matches(r)).cloned();
        Ok(match filter.limit {
            Some(limit) => hits.take(limit).collect(),
            None => hits.collect(),
        })
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Record) -> Result<Vec<Record>, RemoteError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|r| filter.matches(r)) {
            for (k, v) in &patch {
                row.insert(k.clone(), v.clone());
            }
            updated.push(row.clone());
            if filter.limit.is_some_and(|l| updated.len() >= l) {
                break;
            }
        }
        Ok(updated)
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}
