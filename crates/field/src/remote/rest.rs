//! PostgREST-style HTTP binding of the remote store.
//!
//! `GET/POST/PATCH {base}/rest/v1/{table}` with `column=op.value` filters.
//! Status mapping: 409 is a unique violation, other 4xx a rejection, 5xx and
//! network errors are transport failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::r#trait::{Filter, Op, Record, RemoteError, RemoteStore};

#[derive(Debug, Clone)]
pub struct RestRemoteStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RestRemoteStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("apikey", key).bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = self.authorize(req).send().await.map_err(|e| self.map_reqwest_error(e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify(status, body))
    }

    async fn rows(&self, resp: Response) -> Result<Vec<Record>, RemoteError> {
        resp.json::<Vec<Record>>()
            .await
            .map_err(|e| RemoteError::Transport(format!("invalid response body: {e}")))
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

fn classify(status: StatusCode, body: String) -> RemoteError {
    if status == StatusCode::CONFLICT {
        RemoteError::UniqueViolation(body)
    } else if status.is_client_error() {
        RemoteError::Rejected(format!("{status}: {body}"))
    } else {
        RemoteError::Transport(format!("{status}: {body}"))
    }
}

/// `column=op.value` query parameters for a filter.
fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = filter
        .conditions
        .iter()
        .map(|c| {
            let op = match c.op {
                Op::Eq => "eq",
                Op::Gte => "gte",
            };
            (c.column.clone(), format!("{op}.{}", param_value(&c.value)))
        })
        .collect();
    if let Some(limit) = filter.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn insert(&self, table: &str, record: Record) -> Result<Record, RemoteError> {
        let req = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&record);
        let resp = self.send(req).await?;
        self.rows(resp)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Transport("insert returned no row".to_string()))
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, RemoteError> {
        let mut params = filter_params(filter);
        params.insert(0, ("select".to_string(), "*".to_string()));
        let req = self.client.get(self.table_url(table)).query(&params);
        let resp = self.send(req).await?;
        self.rows(resp).await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Record) -> Result<Vec<Record>, RemoteError> {
        let req = self
            .client
            .patch(self.table_url(table))
            .query(&filter_params(filter))
            .header("Prefer", "return=representation")
            .json(&patch);
        let resp = self.send(req).await?;
        self.rows(resp).await
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let req = self.client.get(format!("{}/rest/v1/", self.base_url));
        let resp = self.authorize(req).send().await.map_err(|e| self.map_reqwest_error(e))?;
        if resp.status().is_server_error() {
            return Err(RemoteError::Transport(format!("ping: {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            classify(StatusCode::CONFLICT, "dup".into()),
            RemoteError::UniqueViolation(_)
        ));
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, "bad".into()),
            RemoteError::Rejected(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "".into()),
            RemoteError::Transport(_)
        ));
    }

    #[test]
    fn filters_become_query_params() {
        let filter = Filter::new()
            .eq("disease_code", "MEAS")
            .gte("report_date", "2026-03-08T00:00:00Z")
            .eq("count", json!(3))
            .limit(1);
        assert_eq!(
            filter_params(&filter),
            vec![
                ("disease_code".to_string(), "eq.MEAS".to_string()),
                ("report_date".to_string(), "gte.2026-03-08T00:00:00Z".to_string()),
                ("count".to_string(), "eq.3".to_string()),
                ("limit".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let store = RestRemoteStore::new("http://localhost:54321/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.table_url("case_reports"), "http://localhost:54321/rest/v1/case_reports");
    }
}
