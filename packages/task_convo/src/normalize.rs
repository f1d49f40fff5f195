//! Payload normalization.
//!
//! History rows, push events, and local drafts all arrive in slightly
//! different shapes. [`normalize`] decodes each into a [`WirePayload`] and
//! reduces it to one canonical [`Message`], or rejects it.
//!
//! Role is taken from the first match of:
//! 1. an explicit role tag (`role`, `message.role`, `type`, `message.type`)
//! 2. a `sender` label equal to the local user's display name
//! 3. assistant
//!
//! Text is the plain string payload, or the first non-empty of `text`,
//! `message` (when it is not an object), `message.content`, `message.text`,
//! and `content`.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::Rejection;
use crate::types::{Message, Role, SessionId};

/// Sender label the local user's messages carry when no display name is configured.
pub const DEFAULT_DISPLAY_NAME: &str = "You";

/// What the normalizer needs to know about the caller.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    /// Sender label that identifies the local user.
    pub display_name: &'a str,
    /// Session the payload is being loaded or delivered for, used when the
    /// payload does not name one itself.
    pub session_id: Option<&'a SessionId>,
}

impl<'a> NormalizeContext<'a> {
    pub fn new(display_name: &'a str) -> Self {
        Self {
            display_name,
            session_id: None,
        }
    }

    pub fn for_session(self, session_id: &'a SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            ..self
        }
    }
}

impl Default for NormalizeContext<'static> {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_NAME)
    }
}

/// Shapes accepted on the wire.
#[derive(Debug)]
enum WirePayload {
    Plain(String),
    Record(WireRecord),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    #[serde(default)]
    role: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<Value>,
    #[serde(default)]
    sender: Option<Value>,
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    session_id: Option<Value>,
    #[serde(default, rename = "session_id")]
    session_id_snake: Option<Value>,
}

impl WirePayload {
    fn decode(payload: &Value) -> Result<Self, Rejection> {
        match payload {
            Value::String(text) => Ok(WirePayload::Plain(text.clone())),
            Value::Object(_) => WireRecord::deserialize(payload)
                .map(WirePayload::Record)
                .map_err(|_| Rejection::Undecodable),
            _ => Err(Rejection::Undecodable),
        }
    }
}

impl WireRecord {
    /// Field of the nested `message` object, when `message` is one.
    fn nested(&self, key: &str) -> Option<&Value> {
        self.message.as_ref()?.as_object()?.get(key)
    }

    fn role_tag(&self) -> Option<&str> {
        [
            self.role.as_ref(),
            self.nested("role"),
            self.kind.as_ref(),
            self.nested("type"),
        ]
        .into_iter()
        .flatten()
        .find_map(non_empty_str)
    }

    fn role(&self, display_name: &str) -> Role {
        if let Some(tag) = self.role_tag() {
            return Role::from_tag(tag);
        }
        let sent_by_user = self
            .sender
            .as_ref()
            .and_then(non_empty_str)
            .is_some_and(|sender| sender.trim() == display_name.trim());
        if sent_by_user {
            Role::User
        } else {
            Role::Assistant
        }
    }

    fn text(&self) -> Option<String> {
        let top_level_message = self.message.as_ref().filter(|m| !m.is_object());
        [
            self.text.as_ref(),
            top_level_message,
            self.nested("content"),
            self.nested("text"),
            self.content.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find_map(text_of)
    }

    fn session_id(&self) -> Option<SessionId> {
        [self.session_id.as_ref(), self.session_id_snake.as_ref()]
            .into_iter()
            .flatten()
            .find_map(scalar_string)
            .map(SessionId::from)
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.trim().is_empty())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extracts text from a content value: a string, a number, or a list of
/// content parts whose text parts are joined with newlines.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Array(parts) => {
            let joined = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => {
                        let is_text = obj
                            .get("type")
                            .and_then(Value::as_str)
                            .is_none_or(|t| t == "text");
                        if is_text {
                            obj.get("text").and_then(Value::as_str)
                        } else {
                            None
                        }
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            (!joined.trim().is_empty()).then_some(joined)
        }
        other => scalar_string(other),
    }
}

/// Normalizes one payload into a canonical [`Message`].
///
/// Pure and idempotent: feeding the JSON form of a returned message back in
/// yields the same message.
pub fn normalize(payload: &Value, ctx: &NormalizeContext<'_>) -> Result<Message, Rejection> {
    let fallback_session = ctx.session_id.cloned();
    match WirePayload::decode(payload)? {
        WirePayload::Plain(text) => {
            if text.trim().is_empty() {
                return Err(Rejection::NoText);
            }
            Ok(Message::new(text, Role::Assistant, fallback_session))
        }
        WirePayload::Record(record) => {
            let text = record.text().ok_or(Rejection::NoText)?;
            let role = record.role(ctx.display_name);
            let session_id = record.session_id().or(fallback_session);
            Ok(Message::new(text, role, session_id))
        }
    }
}

/// Normalizes a batch, dropping rejected items instead of failing the batch.
pub fn normalize_all(payloads: &[Value], ctx: &NormalizeContext<'_>) -> Vec<Message> {
    let mut dropped = 0usize;
    let messages: Vec<Message> = payloads
        .iter()
        .filter_map(|payload| match normalize(payload, ctx) {
            Ok(message) => Some(message),
            Err(rejection) => {
                dropped += 1;
                debug!(%rejection, "dropping payload");
                None
            }
        })
        .collect();
    if dropped > 0 {
        debug!(
            kept = messages.len(),
            dropped, "normalized batch with rejections"
        );
    }
    messages
}
