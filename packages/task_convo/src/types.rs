use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque session identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A conversation thread the user can open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Maps an explicit role tag. `user` and `human` are the local user;
    /// every other tag is the assistant.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "user" | "human" => Role::User,
            _ => Role::Assistant,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical message: the shape every history row, push event, and local
/// draft converges to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Message {
    pub fn new(text: impl Into<String>, role: Role, session_id: Option<SessionId>) -> Self {
        Self {
            text: text.into(),
            role,
            session_id,
        }
    }

    pub fn is_from_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn belongs_to(&self, session_id: &SessionId) -> bool {
        self.session_id.as_ref() == Some(session_id)
    }
}

/// Outgoing draft as emitted on the duplex channel: `{sessionId, text, role: "user"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEnvelope {
    pub session_id: SessionId,
    pub text: String,
    pub role: Role,
}

impl OutgoingEnvelope {
    pub fn new(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: text.into(),
            role: Role::User,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "sessionId": self.session_id.as_str(),
            "text": self.text,
            "role": self.role.as_str(),
        })
    }
}
