//! HTTP transport for [`RemoteApi`], speaking the `POST /:command` convention:
//! the JSON body is the command input, the response body its JSON result.
//!
//! Requires the `http` feature.
//!
//! ```ignore
//! let remote = HttpRemote::new("https://api.example.com").with_user("u1");
//! let engine = SyncEngine::open(backend, SchemaRegistry::social(), remote, SyncConfig::default()).await?;
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::error::RemoteError;
use crate::queue::{RemoteCall, VerifyRead};
use crate::snapshot::Snapshot;

use super::RemoteApi;

/// Header identifying the signed-in user to the backend.
pub const USER_HEADER: &str = "x-user-id";

const SNAPSHOT_COMMAND: &str = "sync.snapshot";

#[derive(Clone, Debug)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    user_id: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    async fn post(&self, command: &str, input: &Value) -> Result<Value, RemoteError> {
        let url = format!("{}/{}", self.base_url, command);
        let mut request = self.client.post(&url).json(input);
        if let Some(user_id) = &self.user_id {
            request = request.header(USER_HEADER, user_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if status.is_success() {
            if body.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&body)
                .map_err(|e| RemoteError::Network(format!("invalid response from `{}`: {}", command, e)));
        }

        let message = error_message(&body);
        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            Err(RemoteError::Network(format!("{}: {}", status, message)))
        } else {
            Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// `{ "error": "..." }` bodies yield their message, anything else its text.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        value => Some(value),
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn execute(&self, call: &RemoteCall) -> Result<Option<Value>, RemoteError> {
        self.post(&call.command, &call.input).await.map(non_null)
    }

    async fn read_back(&self, verify: &VerifyRead, input: &Value) -> Result<Option<Value>, RemoteError> {
        self.post(&verify.command, input).await.map(non_null)
    }

    async fn fetch_snapshot(&self, user_id: &str) -> Result<Snapshot, RemoteError> {
        let body = self.post(SNAPSHOT_COMMAND, &json!({ "user_id": user_id })).await?;
        Snapshot::from_value(body).map_err(|e| RemoteError::Rejected {
            status: StatusCode::OK.as_u16(),
            message: format!("malformed snapshot: {}", e),
        })
    }
}
