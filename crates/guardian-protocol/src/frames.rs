use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record on the chat push-stream.
///
/// Wire: `{ "type": "text", "data": "xin" }`,
/// `{ "type": "function_results", "data": [{ "name": ..., "result": ... }] }`,
/// `{ "type": "complete", "data": { "contextUsed": {...}, "functionCalls": 2 } }`,
/// `{ "type": "error", "data": { "message": "..." } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Frame {
    /// Text delta to append to the in-progress assistant message.
    Text(String),
    /// Results of every tool call issued in one model round.
    FunctionResults(Vec<FunctionResult>),
    /// Terminal frame of a successful turn.
    Complete(CompletePayload),
    /// Terminal frame of a failed turn.
    Error(ErrorPayload),
}

impl Frame {
    pub fn text(delta: impl Into<String>) -> Self {
        Frame::Text(delta.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn complete(context_used: ContextUsed, function_calls: u32) -> Self {
        Frame::Complete(CompletePayload {
            context_used,
            function_calls,
        })
    }

    /// `complete` and `error` end a turn; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Complete(_) | Frame::Error(_))
    }

    /// Wire discriminator, handy for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::FunctionResults(_) => "function_results",
            Frame::Complete(_) => "complete",
            Frame::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub name: String,
    pub result: ToolResult,
}

/// Outcome of one tool call: either a JSON payload or `{ "error": reason }`.
///
/// Failures are ordinary values: the model reads the error text and reacts,
/// the turn carries on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResult {
    // Declared first so `{ "error": ... }` never decodes as a success payload.
    Failure { error: String },
    Success(Value),
}

impl ToolResult {
    pub fn success(payload: Value) -> Self {
        ToolResult::Success(payload)
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        ToolResult::Failure {
            error: reason.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Failure { .. })
    }

    /// JSON text handed back to the model as the tool message content.
    pub fn to_model_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"unserializable result"}"#.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub context_used: ContextUsed,
    pub function_calls: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// How much actor-owned data backed an answer.
///
/// `students` counts distinct actor-owned entities; every other field counts
/// related records touched while answering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextUsed {
    pub students: u32,
    pub subjects: u32,
    pub grades: u32,
    pub feedback: u32,
    pub violations: u32,
    pub notifications: u32,
}

impl ContextUsed {
    /// Sum of all related-record counts (everything except `students`).
    pub fn related_records(&self) -> u32 {
        self.subjects
            .saturating_add(self.grades)
            .saturating_add(self.feedback)
            .saturating_add(self.violations)
            .saturating_add(self.notifications)
    }

    pub fn is_empty(&self) -> bool {
        self.students == 0 && self.related_records() == 0
    }
}
