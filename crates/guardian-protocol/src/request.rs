use guardian_core::config::{MAX_HISTORY_ENTRIES, MAX_MESSAGE_CHARS};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Client → server turn request.
/// Wire: `{ "message": "...", "history": [{ "role": "user"|"model", "content": "..." }] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

/// History speaker. The model's own turns are labelled `model` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Model,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            history: Vec::new(),
        }
    }

    /// Reject requests that must never open a stream.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.message.trim().is_empty() {
            return Err(ProtocolError::InvalidRequest(
                "message cannot be empty".to_string(),
            ));
        }
        let chars = self.message.chars().count();
        if chars > MAX_MESSAGE_CHARS {
            return Err(ProtocolError::InvalidRequest(format!(
                "message is {chars} characters (max {MAX_MESSAGE_CHARS})"
            )));
        }
        if self.history.len() > MAX_HISTORY_ENTRIES {
            return Err(ProtocolError::InvalidRequest(format!(
                "history has {} entries (max {MAX_HISTORY_ENTRIES})",
                self.history.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_defaults_to_empty() {
        let req: TurnRequest = serde_json::from_str(r#"{"message":"Xin chào"}"#).unwrap();
        assert!(req.history.is_empty());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn model_role_parses() {
        let req: TurnRequest = serde_json::from_str(
            r#"{"message":"hi","history":[{"role":"user","content":"a"},{"role":"model","content":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(req.history[1].role, HistoryRole::Model);
    }

    #[test]
    fn unknown_role_fails_to_parse() {
        let res = serde_json::from_str::<TurnRequest>(
            r#"{"message":"hi","history":[{"role":"assistant","content":"b"}]}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn blank_and_oversized_messages_are_rejected() {
        assert!(TurnRequest::new("   ").validate().is_err());
        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(TurnRequest::new(long).validate().is_err());
    }
}
