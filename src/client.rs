//! Blocking HTTP client for the hosted PostgREST endpoint (`/rest/v1`).
//!
//! - Uses `ureq` (no async); one agent is reused for every request.
//! - The project key is sent as both `apikey` and bearer token, which is what
//!   the hosted gateway expects for anonymous access.
//! - No retries: a failed request fails the caller's cycle.

use http::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::store::{Query, StoreError, TableStore};

const REST_PATH: &str = "/rest/v1";

pub struct SupabaseClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        SupabaseClient {
            agent: config.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, table: &str) -> String {
        format!("{}{}/{}", self.base_url, REST_PATH, table)
    }

    fn map_transport(err: ureq::Error) -> StoreError {
        match err {
            ureq::Error::HostNotFound
            | ureq::Error::ConnectionFailed
            | ureq::Error::Timeout(_)
            | ureq::Error::Io(_) => StoreError::ConnectionUnavailable(err.to_string()),
            other => StoreError::Transport(other.to_string()),
        }
    }

    /// Turn a non-2xx response into `StoreError::Http`, preferring the
    /// PostgREST `message` field over the raw body.
    fn check_status(status: StatusCode, body: String) -> Result<String, StoreError> {
        if status.is_success() {
            return Ok(body);
        }
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| if body.is_empty() { String::from("<no body>") } else { body });
        Err(StoreError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

impl TableStore for SupabaseClient {
    fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        let mut req = self
            .agent
            .get(&self.url(&query.table))
            .header("Accept", "application/json")
            .header("apikey", &self.api_key)
            .header("Authorization", &format!("Bearer {}", self.api_key));
        for (k, v) in query.params() {
            req = req.query(&k, &v);
        }

        let mut res = req.call().map_err(Self::map_transport)?;
        let status = res.status();
        let body = res.body_mut().read_to_string().map_err(Self::map_transport)?;
        let body = Self::check_status(status, body)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn insert(&self, table: &str, rows: &[Value]) -> Result<(), StoreError> {
        let mut res = self
            .agent
            .post(&self.url(table))
            .header("apikey", &self.api_key)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("Prefer", "return=minimal")
            .send_json(rows)
            .map_err(Self::map_transport)?;
        let status = res.status();
        let body = res.body_mut().read_to_string().map_err(Self::map_transport)?;
        Self::check_status(status, body).map(|_| ())
    }
}
