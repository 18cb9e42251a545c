use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stream::StreamEvent;

/// Tool declaration sent to the model: `{ name, description, parameters }`
/// where `parameters` is a JSON Schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call extracted from the model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One model call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Prepended as the first (system) message.
    pub system: String,
    /// Conversation in chat-completions form: `user`, `assistant` (possibly
    /// carrying `tool_calls`) and `tool` entries, oldest first.
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub stream: bool,
    /// Tools offered on this call. Empty means the model must answer in text.
    pub tools: Vec<ToolDefinition>,
}

/// A complete (non-streamed) model answer.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    /// Tool calls requested by the model. Empty when no tools are called.
    pub tool_calls: Vec<ToolCall>,
}

/// A chat model backend. The orchestrator only ever streams; `send` is the
/// minimum a backend (or a test double) has to provide.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short label for log lines.
    fn name(&self) -> &str;

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Push the response into `tx` as it arrives, ending with `Done`.
    ///
    /// The default replays a whole `send` response as one text delta, then
    /// each tool call, then `Done`.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.send(req).await?;
        let mut events = Vec::with_capacity(resp.tool_calls.len() + 2);
        if !resp.content.is_empty() {
            events.push(StreamEvent::TextDelta { text: resp.content });
        }
        events.extend(resp.tool_calls.into_iter().map(|c| StreamEvent::ToolUse {
            id: c.id,
            name: c.name,
            input: c.input,
        }));
        events.push(StreamEvent::Done {
            model: resp.model,
            tokens_in: resp.tokens_in,
            tokens_out: resp.tokens_out,
            stop_reason: resp.stop_reason,
        });
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer other than 429.
    #[error("model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unreadable model response: {0}")]
    Parse(String),

    #[error("model rate limited, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("model unavailable: {0}")]
    Unavailable(String),
}
