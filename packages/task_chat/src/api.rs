//! Request/response client for the task backend.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use tracing::error;

use crate::config::ClientConfig;
use task_convo::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("backend is unavailable")]
    Unavailable,

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Other(err.into())
        }
    }
}

/// One row of the navigation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(alias = "sessionId", alias = "id")]
    pub session_id: SessionId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

impl SessionSummary {
    /// Creation time, when the backend sent a parseable RFC 3339 timestamp.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Title, or the id when the backend has none.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(self.session_id.as_str())
    }
}

/// Newest first; rows without a parseable timestamp go last in their
/// original order.
pub fn sort_newest_first(sessions: &mut [SessionSummary]) {
    sessions.sort_by(|a, b| b.created().cmp(&a.created()));
}

/// Takes the assigned id from a create-session response: the first present
/// of `sessionId`, `id`, `session_id`.
pub fn extract_session_id(body: &Value) -> Option<SessionId> {
    ["sessionId", "id", "session_id"]
        .iter()
        .filter_map(|key| body.get(key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(SessionId::from(s.trim())),
            Value::Number(n) => Some(SessionId::new(n.to_string())),
            _ => None,
        })
}

/// The backend operations the session controller depends on.
pub trait Backend: Send + Sync + 'static {
    fn list_sessions(&self) -> impl Future<Output = Result<Vec<SessionSummary>, ApiError>> + Send;

    fn create_session(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<SessionId, ApiError>> + Send;

    /// Raw history body for a session; rows are extracted and normalized by
    /// the history loader.
    fn fetch_history(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;

    /// Sends a command and returns the raw reply body.
    fn send_command(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;
}

/// [`Backend`] over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| anyhow::anyhow!("invalid base URL {:?}: {}", config.base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow::anyhow!("base URL {:?} cannot carry paths", config.base_url).into());
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(ApiError::from_reqwest)?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn read_json(resp: reqwest::Response, what: &str) -> Result<Value, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(%status, "{} failed", what);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json().await.map_err(ApiError::from_reqwest)
    }
}

impl Backend for HttpBackend {
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        let resp = self
            .client
            .get(self.endpoint(&["history"]))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let body = Self::read_json(resp, "list sessions").await?;
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn create_session(&self, name: &str) -> Result<SessionId, ApiError> {
        let resp = self
            .client
            .post(self.endpoint(&["new-session"]))
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let body = Self::read_json(resp, "create session").await?;
        extract_session_id(&body)
            .ok_or_else(|| ApiError::Decode(format!("no session id in response: {body}")))
    }

    async fn fetch_history(&self, session_id: &SessionId) -> Result<Value, ApiError> {
        let resp = self
            .client
            .get(self.endpoint(&[session_id.as_str(), "history"]))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::read_json(resp, "fetch history").await
    }

    async fn send_command(&self, session_id: &SessionId, text: &str) -> Result<Value, ApiError> {
        let resp = self
            .client
            .post(self.endpoint(&[session_id.as_str(), "newChat"]))
            .json(&json!({ "message": text }))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::read_json(resp, "send command").await
    }
}
