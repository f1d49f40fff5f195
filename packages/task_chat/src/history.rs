use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::api::{ApiError, Backend};
use task_convo::{Message, NormalizeContext, SessionId, normalize_all};

/// One-shot fetch of a session's persisted messages.
///
/// Does not check whether the session is still active when the response
/// arrives; callers tag the result and discard it if it is stale.
pub struct HistoryLoader<B> {
    backend: Arc<B>,
    display_name: Arc<str>,
}

impl<B> Clone for HistoryLoader<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            display_name: Arc::clone(&self.display_name),
        }
    }
}

impl<B: Backend> HistoryLoader<B> {
    pub fn new(backend: Arc<B>, display_name: impl Into<Arc<str>>) -> Self {
        Self {
            backend,
            display_name: display_name.into(),
        }
    }

    /// Fetches and normalizes the history of `session_id`. Rows that fail
    /// normalization are dropped; a transport failure fails the whole load.
    pub async fn load(&self, session_id: &SessionId) -> Result<Vec<Message>, ApiError> {
        let body = self.backend.fetch_history(session_id).await?;
        let rows = history_rows(body)?;
        let ctx = NormalizeContext::new(&self.display_name).for_session(session_id);
        let messages = normalize_all(&rows, &ctx);
        debug!(
            %session_id,
            rows = rows.len(),
            kept = messages.len(),
            "loaded history"
        );
        Ok(messages)
    }
}

/// Pulls the row array out of a history response: either the body itself,
/// or the array under `history` / `messages`.
pub fn history_rows(body: Value) -> Result<Vec<Value>, ApiError> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut obj) => ["history", "messages"]
            .iter()
            .find_map(|key| match obj.remove(*key) {
                Some(Value::Array(rows)) => Some(rows),
                _ => None,
            })
            .ok_or_else(|| ApiError::Decode("history object carries no row array".to_string())),
        other => Err(ApiError::Decode(format!(
            "expected a history array, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
