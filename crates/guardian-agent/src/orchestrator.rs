//! One chat turn: model call, optional tool round, synthesis call.
//!
//! Flow: message + history → model (with tools) → if tool calls → run them all
//! concurrently → model (no tools) → `complete`. Every turn ends with exactly
//! one `complete` or `error` frame unless the caller goes away first.

use std::sync::Arc;
use std::time::Duration;

use guardian_core::config::AgentConfig;
use guardian_core::types::Actor;
use guardian_protocol::{ContextUsed, Frame, HistoryRole, TurnRequest};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::prompt::PromptBuilder;
use crate::provider::{ChatRequest, LlmProvider, ToolCall, ToolDefinition};
use crate::stream::StreamEvent;
use crate::tools::{ContextTally, DispatchOutcome, Dispatcher, ToolName};

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub max_tokens: u32,
    /// Longest gap allowed between two model stream events. Also bounds
    /// a whole tool round.
    pub idle_timeout: Duration,
    /// Most recent history entries forwarded to the model.
    pub max_history: usize,
}

impl TurnSettings {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs.max(1)),
            max_history: cfg.max_history,
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// How a turn ended, for the caller's logs and bookkeeping. The frames
/// already told the client.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed {
        context_used: ContextUsed,
        function_calls: u32,
    },
    Failed {
        message: String,
    },
    /// The caller cancelled or stopped listening; no terminal frame was sent.
    Cancelled,
}

/// Result of streaming one model response.
enum RoundEnd {
    Finished { text: String, calls: Vec<ToolCall> },
    Failed(String),
    Cancelled,
}

pub struct TurnOrchestrator {
    provider: Arc<dyn LlmProvider>,
    dispatcher: Dispatcher,
    prompt: PromptBuilder,
    settings: TurnSettings,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        dispatcher: Dispatcher,
        prompt: PromptBuilder,
        settings: TurnSettings,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            prompt,
            settings,
        }
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    /// Run one turn for `actor`, pushing frames into `frames` in production
    /// order. `request` must already be validated.
    pub async fn run_turn(
        &self,
        actor: &Actor,
        request: &TurnRequest,
        frames: mpsc::Sender<Frame>,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let system = self.prompt.build(actor.role);
        let mut messages = self.initial_messages(request);

        // Round 1: the model may answer directly or ask for tools.
        let first = self.chat_request(&system, &messages, ToolName::definitions());
        let (text, calls) = match self.stream_round(&first, &frames, &cancel).await {
            RoundEnd::Finished { text, calls } => (text, calls),
            RoundEnd::Failed(message) => return fail(&frames, actor, message).await,
            RoundEnd::Cancelled => return cancelled(actor),
        };

        if calls.is_empty() {
            return finish(&frames, actor, ContextUsed::default(), 0).await;
        }

        info!(actor = %actor.id, tools = calls.len(), "model requested tools");
        let tool_round = tokio::time::timeout(
            self.settings.idle_timeout,
            self.dispatcher.dispatch_all(&actor.id, &calls),
        );
        let outcomes = tokio::select! {
            _ = cancel.cancelled() => return cancelled(actor),
            outcomes = tool_round => match outcomes {
                Ok(outcomes) => outcomes,
                Err(_) => {
                    warn!(
                        actor = %actor.id,
                        secs = self.settings.idle_timeout.as_secs(),
                        "tool round timed out"
                    );
                    let message = format!(
                        "record lookups did not finish within {}s",
                        self.settings.idle_timeout.as_secs()
                    );
                    return fail(&frames, actor, message).await;
                }
            },
        };

        let results = outcomes.iter().map(DispatchOutcome::function_result).collect();
        if frames.send(Frame::FunctionResults(results)).await.is_err() {
            return cancelled(actor);
        }

        let mut tally = ContextTally::default();
        for outcome in &outcomes {
            tally.merge(outcome.tally.clone());
        }
        let function_calls = u32::try_from(calls.len()).unwrap_or(u32::MAX);

        append_tool_round(&mut messages, &text, &calls, &outcomes);

        // Round 2: synthesis over the tool outputs. No tools are offered, so
        // the turn never makes a third model call.
        let second = self.chat_request(&system, &messages, Vec::new());
        match self.stream_round(&second, &frames, &cancel).await {
            RoundEnd::Finished { calls, .. } => {
                if !calls.is_empty() {
                    warn!(
                        actor = %actor.id,
                        ignored = calls.len(),
                        "model requested tools during synthesis; ignoring"
                    );
                }
            }
            RoundEnd::Failed(message) => return fail(&frames, actor, message).await,
            RoundEnd::Cancelled => return cancelled(actor),
        }

        finish(&frames, actor, tally.context_used(), function_calls).await
    }

    /// History (capped) followed by the new user message, in chat-completions form.
    fn initial_messages(&self, request: &TurnRequest) -> Vec<serde_json::Value> {
        let skip = request
            .history
            .len()
            .saturating_sub(self.settings.max_history);
        let mut messages: Vec<serde_json::Value> = request
            .history
            .iter()
            .skip(skip)
            .filter(|h| !h.content.trim().is_empty())
            .map(|h| {
                let role = match h.role {
                    HistoryRole::User => "user",
                    HistoryRole::Model => "assistant",
                };
                serde_json::json!({ "role": role, "content": h.content })
            })
            .collect();
        messages.push(serde_json::json!({ "role": "user", "content": request.message }));
        messages
    }

    fn chat_request(
        &self,
        system: &str,
        messages: &[serde_json::Value],
        tools: Vec<ToolDefinition>,
    ) -> ChatRequest {
        ChatRequest {
            model: self.settings.model.clone(),
            system: system.to_string(),
            messages: messages.to_vec(),
            max_tokens: self.settings.max_tokens,
            stream: true,
            tools,
        }
    }

    /// Stream one model response, forwarding text deltas as `text` frames and
    /// collecting tool calls. Fails if the stream goes quiet for longer than
    /// the idle timeout.
    async fn stream_round(
        &self,
        req: &ChatRequest,
        frames: &mpsc::Sender<Frame>,
        cancel: &CancellationToken,
    ) -> RoundEnd {
        let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent>(64);
        let send_fut = self.provider.send_stream(req, stream_tx);
        tokio::pin!(send_fut);

        let idle_timeout = self.settings.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        let mut stream_open = true;
        let mut send_done = false;

        while stream_open || !send_done {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("turn cancelled during model call");
                    return RoundEnd::Cancelled;
                }
                _ = &mut idle => {
                    warn!(
                        provider = self.provider.name(),
                        secs = idle_timeout.as_secs(),
                        "model stream idle, giving up"
                    );
                    return RoundEnd::Failed(format!(
                        "model stream idle for {}s",
                        idle_timeout.as_secs()
                    ));
                }
                event = stream_rx.recv(), if stream_open => {
                    match event {
                        Some(StreamEvent::TextDelta { text: delta }) => {
                            if !delta.is_empty() {
                                text.push_str(&delta);
                                if frames.send(Frame::text(delta)).await.is_err() {
                                    return RoundEnd::Cancelled;
                                }
                            }
                        }
                        Some(StreamEvent::ToolUse { id, name, input }) => {
                            calls.push(ToolCall { id, name, input });
                        }
                        Some(StreamEvent::Done { model, tokens_in, tokens_out, stop_reason }) => {
                            debug!(%model, tokens_in, tokens_out, %stop_reason, "model stream done");
                        }
                        Some(StreamEvent::Error { message }) => {
                            warn!(provider = self.provider.name(), error = %message, "model stream error");
                            return RoundEnd::Failed(message);
                        }
                        None => stream_open = false,
                    }
                    // Waiting on a slow reader is not model silence.
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
                result = &mut send_fut, if !send_done => {
                    send_done = true;
                    if let Err(e) = result {
                        warn!(provider = self.provider.name(), error = %e, "send_stream failed");
                        return RoundEnd::Failed(e.to_string());
                    }
                    // Remaining buffered events are drained by the recv arm.
                }
            }
        }

        RoundEnd::Finished { text, calls }
    }
}

/// Record the assistant's tool request and each tool's output so the
/// synthesis call sees the whole exchange.
fn append_tool_round(
    messages: &mut Vec<serde_json::Value>,
    text: &str,
    calls: &[ToolCall],
    outcomes: &[DispatchOutcome],
) {
    let tool_calls: Vec<serde_json::Value> = calls
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "type": "function",
                "function": {
                    "name": c.name,
                    "arguments": c.input.to_string(),
                }
            })
        })
        .collect();
    let content = if text.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::Value::String(text.to_string())
    };
    messages.push(serde_json::json!({
        "role": "assistant",
        "content": content,
        "tool_calls": tool_calls,
    }));
    for outcome in outcomes {
        messages.push(serde_json::json!({
            "role": "tool",
            "tool_call_id": outcome.call_id,
            "name": outcome.name,
            "content": outcome.result.to_model_content(),
        }));
    }
}

async fn finish(
    frames: &mpsc::Sender<Frame>,
    actor: &Actor,
    context_used: ContextUsed,
    function_calls: u32,
) -> TurnOutcome {
    if frames
        .send(Frame::complete(context_used, function_calls))
        .await
        .is_err()
    {
        return cancelled(actor);
    }
    info!(actor = %actor.id, function_calls, "turn complete");
    TurnOutcome::Completed {
        context_used,
        function_calls,
    }
}

async fn fail(frames: &mpsc::Sender<Frame>, actor: &Actor, message: String) -> TurnOutcome {
    warn!(actor = %actor.id, error = %message, "turn failed");
    // Receiver may already be gone; the outcome is the same either way.
    let _ = frames.send(Frame::error(message.clone())).await;
    TurnOutcome::Failed { message }
}

fn cancelled(actor: &Actor) -> TurnOutcome {
    info!(actor = %actor.id, "turn cancelled");
    TurnOutcome::Cancelled
}
