//! OpenAI-compatible chat completions provider.
//!
//! Works against any endpoint that speaks the `/chat/completions` format,
//! including Gemini's OpenAI-compatible surface and local servers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};
use crate::stream::{parse_sse_line, LineBuffer, SseParsed, StreamEvent};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String, chat_path: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_path,
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000) // convert seconds to ms
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat completions API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    /// Non-streaming completion. Turns always go through `send_stream`;
    /// this exists because the trait requires it.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req, false);
        debug!(model = %req.model, tools = req.tools.len(), "sending chat completions request");

        let api_resp: ApiResponse = self
            .post(&body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_response(api_resp)
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let body = build_request_body(req, true);
        debug!(model = %req.model, tools = req.tools.len(), "sending streaming chat completions request");

        let resp = self.post(&body).await?;
        process_stream(resp, req.model.clone(), tx).await;
        Ok(())
    }
}

pub(crate) fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    // System prompt goes first as a system message.
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];

    messages.extend(req.messages.iter().cloned());

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "stream": stream,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }
    if stream {
        body["stream_options"] = serde_json::json!({ "include_usage": true });
    }
    body
}

/// Used only by [`OpenAiProvider::send`].
fn parse_response(resp: ApiResponse) -> Result<ChatResponse, ProviderError> {
    let choice = resp.choices.into_iter().next();
    let (message, finish_reason) = match choice {
        Some(c) => (c.message, c.finish_reason),
        None => return Err(ProviderError::Parse("response has no choices".to_string())),
    };

    let mut tool_calls = Vec::new();
    for (i, call) in message.tool_calls.unwrap_or_default().into_iter().enumerate() {
        tool_calls.push(ToolCall {
            id: call.id.unwrap_or_else(|| format!("call_{i}")),
            name: call.function.name,
            input: parse_arguments(&call.function.arguments),
        });
    }

    Ok(ChatResponse {
        content: message.content.unwrap_or_default(),
        model: resp.model,
        tokens_in: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        tokens_out: resp.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
        stop_reason: finish_reason.unwrap_or_default(),
        tool_calls,
    })
}

/// Arguments arrive as a JSON string. An empty string means "no arguments";
/// unparseable text is passed through as a string so the tool can reject it.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Tool call assembled from streamed fragments, keyed by `index`.
#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Parse the streaming SSE response and emit StreamEvents.
/// Each data line carries a JSON delta; `data: [DONE]` signals end.
async fn process_stream(resp: reqwest::Response, model: String, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut state = StreamState::new(model);
    let mut lines = LineBuffer::default();
    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        for line in lines.push(&chunk) {
            match state.feed_line(&line) {
                LineOutcome::Events(events) => {
                    for ev in events {
                        if tx.send(ev).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                }
                LineOutcome::Finished => break 'outer,
            }
        }
    }
    if let Some(rest) = lines.take_rest() {
        if let LineOutcome::Events(events) = state.feed_line(&rest) {
            for ev in events {
                let _ = tx.send(ev).await;
            }
        }
    }

    for ev in state.finish() {
        if tx.send(ev).await.is_err() {
            return;
        }
    }
}

enum LineOutcome {
    Events(Vec<StreamEvent>),
    Finished,
}

/// Accumulates one streamed completion. Separated from the network loop so
/// the delta handling is testable against canned lines.
struct StreamState {
    model: String,
    tokens_in: u32,
    tokens_out: u32,
    stop_reason: String,
    tools: BTreeMap<u32, PartialToolCall>,
}

impl StreamState {
    fn new(model: String) -> Self {
        Self {
            model,
            tokens_in: 0,
            tokens_out: 0,
            stop_reason: String::new(),
            tools: BTreeMap::new(),
        }
    }

    fn feed_line(&mut self, line: &str) -> LineOutcome {
        let line = line.trim();
        let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
            return LineOutcome::Events(Vec::new());
        };
        if data.trim() == "[DONE]" {
            return LineOutcome::Finished;
        }

        let mut events = Vec::new();
        let chunk: StreamChunk = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "skipping undecodable stream chunk");
                return LineOutcome::Events(events);
            }
        };

        if let Some(m) = chunk.model {
            if !m.is_empty() {
                self.model = m;
            }
        }
        // usage may arrive on the final chunk only
        if let Some(usage) = &chunk.usage {
            self.tokens_in = usage.prompt_tokens;
            self.tokens_out = usage.completion_tokens;
        }

        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                if !reason.is_empty() {
                    self.stop_reason = reason;
                }
            }
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(StreamEvent::TextDelta { text: content });
                }
            }
            for frag in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.tools.entry(frag.index).or_default();
                if let Some(id) = frag.id {
                    entry.id = id;
                }
                if let Some(f) = frag.function {
                    if let Some(name) = f.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(args) = f.arguments {
                        entry.arguments.push_str(&args);
                    }
                }
            }
        }
        LineOutcome::Events(events)
    }

    /// Flush accumulated tool calls, then the terminal Done event.
    fn finish(self) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = self
            .tools
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| StreamEvent::ToolUse {
                id: if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                },
                name: call.name,
                input: parse_arguments(&call.arguments),
            })
            .collect();
        events.push(StreamEvent::Done {
            model: self.model,
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            stop_reason: self.stop_reason,
        });
        events
    }
}

// Chat completions response types (private, deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: Option<String>,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// Streaming chunk types

#[derive(Deserialize)]
struct StreamChunk {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}
