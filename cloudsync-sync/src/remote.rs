//! Remote store seam and its HTTP/JSON client.
//!
//! Endpoints (relative to the configured base URL):
//!
//! | method | path                     | use                         |
//! |--------|--------------------------|-----------------------------|
//! | GET    | `/api/cloud/all`         | full snapshot               |
//! | POST   | `/api/cloud`             | write one variable          |
//! | GET    | `/api/cloud?name=<name>` | read one variable           |
//! | GET    | `/health`                | liveness                    |
//!
//! A rejected write comes back as HTTP 409 with `serverValue` and
//! `serverTimestamp`; that is a [`WriteOutcome::Rejected`], not an error.
//! `ureq` is blocking, so the async trait methods run it on tokio's
//! blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use cloudsync_core::{
    RemoteEntry, RemoteSnapshot, SyncConfig, Timestamp, VariableName, WriteOutcome, WriteRequest,
};

use crate::error::SyncError;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch every variable the store holds.
    async fn fetch_snapshot(&self) -> Result<RemoteSnapshot, SyncError>;

    /// Issue one write. Conflicts are `Ok(WriteOutcome::Rejected { .. })`.
    async fn write(&self, request: &WriteRequest) -> Result<WriteOutcome, SyncError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    variables: RemoteSnapshot,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    name: &'a str,
    value: &'a str,
    timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    new_value: Option<String>,
    #[serde(default, alias = "lastModified")]
    timestamp: Option<Timestamp>,
    #[serde(default)]
    server_value: Option<String>,
    #[serde(default)]
    server_timestamp: Option<Timestamp>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VariableResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    value: Option<String>,
    #[serde(default, alias = "lastModified")]
    timestamp: Option<Timestamp>,
    #[serde(default)]
    error: Option<String>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub uptime: Option<String>,
}

fn interpret_write(response: WriteResponse, sent: &WriteRequest) -> Result<WriteOutcome, SyncError> {
    if response.success {
        return Ok(WriteOutcome::Accepted {
            value: response.new_value.unwrap_or_else(|| sent.value.clone()),
            timestamp: response.timestamp.unwrap_or(sent.timestamp),
        });
    }
    match (response.server_value, response.server_timestamp) {
        (Some(server_value), Some(server_timestamp)) => Ok(WriteOutcome::Rejected {
            server_value,
            server_timestamp,
            reason: response.error,
        }),
        _ => Err(SyncError::Remote(
            response
                .error
                .unwrap_or_else(|| format!("write of '{}' rejected", sent.name)),
        )),
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// [`RemoteStore`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpStore {
    agent: ureq::Agent,
    base_url: String,
    session_key: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, session_key: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_key,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.server_url.clone(),
            config.session_key.clone(),
            config.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, path: &str) -> ureq::Request {
        let request = self.agent.get(&self.url(path));
        match self.session_key.as_deref() {
            Some(key) => request.query("session", key),
            None => request,
        }
    }

    pub fn fetch_snapshot_blocking(&self) -> Result<RemoteSnapshot, SyncError> {
        let request = self.get("/api/cloud/all");
        let url = request.url().to_string();
        let response: SnapshotResponse = decode(&url, dispatch(&url, request.call(), false)?)?;
        if !response.success {
            return Err(SyncError::Remote(
                response
                    .error
                    .unwrap_or_else(|| "snapshot request failed".to_string()),
            ));
        }
        Ok(response.variables)
    }

    pub fn write_blocking(&self, request: &WriteRequest) -> Result<WriteOutcome, SyncError> {
        let url = self.url("/api/cloud");
        let body = WriteBody {
            name: request.name.as_str(),
            value: &request.value,
            timestamp: request.timestamp,
            session: self.session_key.as_deref(),
        };
        let result = self.agent.post(&url).send_json(&body);
        let response: WriteResponse = decode(&url, dispatch(&url, result, true)?)?;
        interpret_write(response, request)
    }

    /// Read one variable. The reference store creates unknown names with
    /// value `"0"` on read.
    pub fn fetch_variable_blocking(&self, name: &VariableName) -> Result<RemoteEntry, SyncError> {
        let request = self.get("/api/cloud").query("name", name.as_str());
        let url = request.url().to_string();
        let response: VariableResponse = decode(&url, dispatch(&url, request.call(), false)?)?;
        match (response.success, response.value) {
            (true, Some(value)) => Ok(RemoteEntry::new(
                value,
                response.timestamp.unwrap_or_default(),
            )),
            _ => Err(SyncError::Remote(
                response
                    .error
                    .unwrap_or_else(|| format!("read of '{name}' failed")),
            )),
        }
    }

    pub fn health_blocking(&self) -> Result<HealthReport, SyncError> {
        let url = self.url("/health");
        decode(&url, dispatch(&url, self.agent.get(&url).call(), false)?)
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn fetch_snapshot(&self) -> Result<RemoteSnapshot, SyncError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.fetch_snapshot_blocking())
            .await
            .map_err(|err| SyncError::Join(err.to_string()))?
    }

    async fn write(&self, request: &WriteRequest) -> Result<WriteOutcome, SyncError> {
        let store = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || store.write_blocking(&request))
            .await
            .map_err(|err| SyncError::Join(err.to_string()))?
    }
}

/// Map ureq's result onto ours. With `conflict_ok`, a 409 response is
/// handed back for decoding because it carries the store's state.
fn dispatch(
    url: &str,
    result: Result<ureq::Response, ureq::Error>,
    conflict_ok: bool,
) -> Result<ureq::Response, SyncError> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(409, response)) if conflict_ok => Ok(response),
        Err(ureq::Error::Status(status, response)) => Err(SyncError::Status {
            url: url.to_string(),
            status,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => Err(SyncError::Transport {
            url: url.to_string(),
            message: transport.to_string(),
        }),
    }
}

fn decode<T: DeserializeOwned>(url: &str, response: ureq::Response) -> Result<T, SyncError> {
    response.into_json::<T>().map_err(|source| SyncError::Decode {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sent() -> WriteRequest {
        WriteRequest {
            name: VariableName::from("CloudScore"),
            value: "5".to_string(),
            timestamp: Timestamp(100),
        }
    }

    fn response(json: &str) -> WriteResponse {
        serde_json::from_str(json).expect("decode")
    }

    #[test]
    fn accepted_write_uses_store_canonical_values() {
        let outcome = interpret_write(
            response(
                r#"{"success":true,"name":"CloudScore","oldValue":"4","newValue":"5","timestamp":1700}"#,
            ),
            &sent(),
        )
        .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Accepted {
                value: "5".to_string(),
                timestamp: Timestamp(1700),
            }
        );
    }

    #[test]
    fn conflict_body_becomes_rejected_outcome() {
        let outcome = interpret_write(
            response(
                r#"{"success":false,"error":"Update rejected: Server has newer value","serverValue":"9","serverTimestamp":2000}"#,
            ),
            &sent(),
        )
        .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Rejected {
                server_value: "9".to_string(),
                server_timestamp: Timestamp(2000),
                reason: Some("Update rejected: Server has newer value".to_string()),
            }
        );
    }

    #[test]
    fn failure_without_server_state_is_an_error() {
        let err = interpret_write(
            response(r#"{"success":false,"error":"Name and value are required"}"#),
            &sent(),
        )
        .unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("Name and value are required"));
    }

    #[rstest]
    #[case(r#"{"success":true,"variables":{}}"#, 0)]
    #[case(r#"{"success":true,"variables":{"CloudA":{"value":"1","timestamp":5}}}"#, 1)]
    #[case(
        r#"{"success":true,"variables":{"CloudA":{"value":"1","timestamp":5},"CloudB":{"value":"x","lastModified":6}}}"#,
        2
    )]
    fn snapshot_bodies_decode(#[case] body: &str, #[case] expected: usize) {
        let decoded: SnapshotResponse = serde_json::from_str(body).expect("decode");
        assert!(decoded.success);
        assert_eq!(decoded.variables.len(), expected);
    }

    #[test]
    fn write_body_omits_missing_session() {
        let body = WriteBody {
            name: "CloudScore",
            value: "1",
            timestamp: Timestamp(7),
            session: None,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"name":"CloudScore","value":"1","timestamp":7}"#
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let store = HttpStore::new("http://store.test/", None, Duration::from_secs(1));
        assert_eq!(store.url("/health"), "http://store.test/health");
    }

    #[test]
    fn unreachable_store_is_a_transport_error() {
        // Nothing listens on the discard port.
        let store = HttpStore::new("http://127.0.0.1:9", None, Duration::from_millis(500));
        let err = store.fetch_snapshot_blocking().unwrap_err();
        assert!(matches!(err, SyncError::Transport { .. }), "got: {err}");
    }
}
