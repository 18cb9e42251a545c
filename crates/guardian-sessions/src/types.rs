use guardian_core::types::{ActorId, ConversationId, MessageId, MessageRole};
use guardian_protocol::ContextUsed;
use serde::{Deserialize, Serialize};

/// Longest conversation title, in characters.
pub const MAX_TITLE_CHARS: usize = 60;

/// A persisted conversation. Created lazily on the first saved message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub actor_id: ActorId,
    /// First user message, truncated. `None` until one is saved.
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A message as stored, in conversation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<ContextUsed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calls: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_strength: Option<f64>,
    pub created_at: String,
}

/// Body of a save request. The id is assigned by whoever created the
/// message, before the save round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<ContextUsed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calls: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_strength: Option<f64>,
    /// RFC3339; the store stamps the current time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl SaveMessage {
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: MessageRole::User,
            content: content.into(),
            context_used: None,
            function_calls: None,
            prompt_strength: None,
            created_at: None,
        }
    }

    pub fn assistant(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            ..Self::user(id, content)
        }
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }
}

/// Conversation title derived from the first user message.
pub fn title_from(message: &str) -> String {
    let trimmed = message.trim();
    let mut title: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        title = title.trim_end().to_string();
    }
    title
}
