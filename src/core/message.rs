use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a message. Roles this crate does not know are carried through
/// unchanged as [`MessageRole::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
    Other(String),
}

/// A chat message as held by a conversation view.
///
/// Only `id` and `role` are interpreted here; every other field (content
/// parts, attachments, metadata) is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: MessageRole) -> Self {
        Self {
            id: id.into(),
            role,
            body: Map::new(),
        }
    }

    pub fn text(id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        let mut message = Self::new(id, role);
        message
            .body
            .insert("content".to_string(), Value::String(content.into()));
        message
    }

    /// Plain-text `content`, when the message carries one.
    pub fn content(&self) -> Option<&str> {
        self.body.get("content").and_then(Value::as_str)
    }
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
            MessageRole::Other(role) => role,
        }
    }

    pub fn is_user(&self) -> bool {
        *self == MessageRole::User
    }
}

impl From<&str> for MessageRole {
    fn from(value: &str) -> Self {
        match value {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            "tool" => MessageRole::Tool,
            other => MessageRole::Other(other.to_string()),
        }
    }
}

impl From<String> for MessageRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user" | "assistant" | "system" | "tool" => Self::from(value.as_str()),
            _ => MessageRole::Other(value),
        }
    }
}

impl From<MessageRole> for String {
    fn from(value: MessageRole) -> Self {
        match value {
            MessageRole::Other(role) => role,
            known => known.as_str().to_string(),
        }
    }
}
