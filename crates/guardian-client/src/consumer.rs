//! Client-side turn state machine.
//!
//! ```text
//! Idle -> Open -> { AccumulatingText <-> AwaitingTools } -> Complete | Failed | Abandoned
//! ```
//!
//! The accumulator owns the in-progress assistant message. It only ever
//! appends to the message content, so what the user has already seen is
//! never rolled back, whatever happens to the stream afterwards.

use guardian_core::types::MessageId;
use guardian_protocol::strength::strength;
use guardian_protocol::{CompletePayload, ContextUsed, Frame};
use tracing::{debug, warn};

/// Shown in place of an answer when the turn fails before any text arrived.
pub const APOLOGY_TEXT: &str =
    "Sorry, I couldn't put together an answer just now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Open,
    AccumulatingText,
    AwaitingTools,
    Complete,
    Failed,
    Abandoned,
}

impl ConsumerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConsumerState::Complete | ConsumerState::Failed | ConsumerState::Abandoned
        )
    }
}

/// How the turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Failed,
    Abandoned,
}

/// Whether a frame changed the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Accepted,
    Ignored,
}

/// The assistant message as the user currently sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantDraft {
    pub id: MessageId,
    pub content: String,
    /// Set once a `complete` frame arrives. Failed and abandoned turns keep
    /// whatever content they had but are never finalized.
    pub finalized: bool,
}

/// Snapshot of a finished turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub status: TurnStatus,
    /// Always set for a terminal turn: completed turns carry the (possibly
    /// empty) answer, failed and abandoned ones the partial text or apology.
    pub message: Option<AssistantDraft>,
    pub context_used: Option<ContextUsed>,
    pub function_calls: u32,
    pub prompt_strength: Option<f64>,
    /// Transient, user-visible failure notice.
    pub notice: Option<String>,
}

#[derive(Debug)]
pub struct TurnAccumulator {
    state: ConsumerState,
    message_id: Option<MessageId>,
    message: Option<AssistantDraft>,
    function_calls: u32,
    context_used: Option<ContextUsed>,
    prompt_strength: Option<f64>,
    notice: Option<String>,
}

impl Default for TurnAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self {
            state: ConsumerState::Idle,
            message_id: None,
            message: None,
            function_calls: 0,
            context_used: None,
            prompt_strength: None,
            notice: None,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn message(&self) -> Option<&AssistantDraft> {
        self.message.as_ref()
    }

    pub fn function_calls(&self) -> u32 {
        self.function_calls
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Start a turn. `message_id` becomes the id of the assistant message
    /// once the first text arrives. Returns false when a turn is already
    /// running.
    pub fn open(&mut self, message_id: MessageId) -> bool {
        if !matches!(self.state, ConsumerState::Idle) && !self.state.is_terminal() {
            warn!(state = ?self.state, "open() while a turn is still running");
            return false;
        }
        *self = Self::new();
        self.message_id = Some(message_id);
        self.state = ConsumerState::Open;
        true
    }

    /// Feed one decoded frame.
    pub fn apply(&mut self, frame: Frame) -> Applied {
        if self.state.is_terminal() || self.state == ConsumerState::Idle {
            debug!(state = ?self.state, kind = frame.kind(), "ignoring frame");
            return Applied::Ignored;
        }

        match frame {
            Frame::Text(delta) => {
                self.append(&delta);
                self.state = ConsumerState::AccumulatingText;
            }
            Frame::FunctionResults(results) => {
                let added = u32::try_from(results.len()).unwrap_or(u32::MAX);
                self.function_calls = self.function_calls.saturating_add(added);
                self.state = ConsumerState::AwaitingTools;
            }
            Frame::Complete(CompletePayload {
                context_used,
                function_calls,
            }) => {
                if function_calls != self.function_calls {
                    debug!(
                        counted = self.function_calls,
                        reported = function_calls,
                        "tool count differs from server total"
                    );
                }
                // The server total covers rounds whose frames we may not
                // have decoded.
                self.function_calls = self.function_calls.max(function_calls);
                self.context_used = Some(context_used);
                self.prompt_strength = Some(strength(&context_used, self.function_calls));
                // A turn may finish without any text; it still has a message.
                let id = self.message_id.clone().unwrap_or_default();
                self.message
                    .get_or_insert_with(|| AssistantDraft {
                        id,
                        content: String::new(),
                        finalized: false,
                    })
                    .finalized = true;
                self.state = ConsumerState::Complete;
            }
            Frame::Error(payload) => {
                self.notice = Some(payload.message);
                self.ensure_fallback();
                self.state = ConsumerState::Failed;
            }
        }
        Applied::Accepted
    }

    /// End a turn whose stream stalled or dropped before a terminal frame.
    ///
    /// Returns `None` when the turn had already ended.
    pub fn abandon(&mut self, notice: impl Into<String>) -> Option<TurnResult> {
        if self.state.is_terminal() || self.state == ConsumerState::Idle {
            return None;
        }
        let notice = notice.into();
        warn!(state = ?self.state, notice = %notice, "abandoning turn");
        self.notice = Some(notice);
        self.ensure_fallback();
        self.state = ConsumerState::Abandoned;
        self.result()
    }

    /// The finished turn, once the accumulator reached a terminal state.
    pub fn result(&self) -> Option<TurnResult> {
        let status = match self.state {
            ConsumerState::Complete => TurnStatus::Completed,
            ConsumerState::Failed => TurnStatus::Failed,
            ConsumerState::Abandoned => TurnStatus::Abandoned,
            _ => return None,
        };
        Some(TurnResult {
            status,
            message: self.message.clone(),
            context_used: self.context_used,
            function_calls: self.function_calls,
            prompt_strength: self.prompt_strength,
            notice: self.notice.clone(),
        })
    }

    /// Back to `Idle`, dropping everything from the last turn.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn append(&mut self, delta: &str) {
        match self.message.as_mut() {
            Some(message) => message.content.push_str(delta),
            None => {
                let id = self.message_id.clone().unwrap_or_default();
                self.message = Some(AssistantDraft {
                    id,
                    content: delta.to_string(),
                    finalized: false,
                });
            }
        }
    }

    fn ensure_fallback(&mut self) {
        let has_content = self
            .message
            .as_ref()
            .is_some_and(|m| !m.content.is_empty());
        if !has_content {
            self.message = None;
            self.append(APOLOGY_TEXT);
        }
    }
}

#[cfg(test)]
mod tests {
    use guardian_protocol::{FrameDecoder, FunctionResult, ToolResult};

    use super::*;

    fn opened() -> TurnAccumulator {
        let mut acc = TurnAccumulator::new();
        assert!(acc.open(MessageId::from("asst-1")));
        acc
    }

    fn result(name: &str) -> FunctionResult {
        FunctionResult {
            name: name.to_string(),
            result: ToolResult::success(serde_json::json!({"count": 1})),
        }
    }

    #[test]
    fn no_tool_turn_scores_base_strength() {
        let mut acc = opened();
        acc.apply(Frame::text("Xin chào"));
        acc.apply(Frame::complete(ContextUsed::default(), 0));

        let done = acc.result().unwrap();
        assert_eq!(done.status, TurnStatus::Completed);
        let msg = done.message.unwrap();
        assert_eq!(msg.id, MessageId::from("asst-1"));
        assert_eq!(msg.content, "Xin chào");
        assert!(msg.finalized);
        assert_eq!(done.function_calls, 0);
        assert!((done.prompt_strength.unwrap() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn function_results_count_and_leave_content_alone() {
        let mut acc = opened();
        acc.apply(Frame::FunctionResults(vec![result("getChildrenList"), result("getViolations")]));
        assert_eq!(acc.state(), ConsumerState::AwaitingTools);
        assert!(acc.message().is_none());
        assert_eq!(acc.function_calls(), 2);

        acc.apply(Frame::text("Hai con"));
        assert_eq!(acc.state(), ConsumerState::AccumulatingText);
        assert_eq!(acc.message().unwrap().content, "Hai con");
    }

    #[test]
    fn content_is_concatenation_under_any_chunking() {
        let frames = [
            Frame::text("Minh "),
            Frame::text("được "),
            Frame::text("8.5 điểm Toán."),
            Frame::complete(ContextUsed::default(), 0),
        ];
        let wire: Vec<u8> = frames
            .iter()
            .flat_map(|f| guardian_protocol::encode(f).unwrap().into_bytes())
            .collect();

        for chunk_size in [1, 2, 3, 7, 64, wire.len()] {
            let mut acc = opened();
            let mut decoder = FrameDecoder::new();
            let mut seen = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                for frame in decoder.push(chunk) {
                    acc.apply(frame.unwrap());
                    if let Some(m) = acc.message() {
                        seen.push(m.content.clone());
                    }
                }
            }
            // Every observed content is a prefix of the next one.
            for pair in seen.windows(2) {
                assert!(pair[1].starts_with(&pair[0]));
            }
            assert_eq!(acc.message().unwrap().content, "Minh được 8.5 điểm Toán.");
            assert_eq!(acc.state(), ConsumerState::Complete);
        }
    }

    #[test]
    fn error_before_text_materializes_apology() {
        let mut acc = opened();
        acc.apply(Frame::error("model unavailable"));

        let done = acc.result().unwrap();
        assert_eq!(done.status, TurnStatus::Failed);
        assert_eq!(done.notice.as_deref(), Some("model unavailable"));
        let msg = done.message.unwrap();
        assert_eq!(msg.content, APOLOGY_TEXT);
        assert_eq!(msg.id, MessageId::from("asst-1"));
        assert!(!msg.finalized);
        assert!(done.prompt_strength.is_none());
    }

    #[test]
    fn error_after_text_keeps_partial_content() {
        let mut acc = opened();
        acc.apply(Frame::text("Điểm của Minh"));
        acc.apply(Frame::error("stream interrupted"));

        let msg = acc.message().unwrap();
        assert_eq!(msg.content, "Điểm của Minh");
        assert!(!msg.finalized);
        assert_eq!(acc.notice(), Some("stream interrupted"));
    }

    #[test]
    fn complete_without_text_still_finalizes_a_message() {
        let mut acc = opened();
        acc.apply(Frame::FunctionResults(Vec::new()));
        let ctx = ContextUsed {
            students: 1,
            grades: 4,
            ..ContextUsed::default()
        };
        acc.apply(Frame::complete(ctx, 1));

        let done = acc.result().unwrap();
        assert_eq!(done.status, TurnStatus::Completed);
        let msg = done.message.unwrap();
        assert_eq!(msg.id, MessageId::from("asst-1"));
        assert_eq!(msg.content, "");
        assert!(msg.finalized);
        assert_eq!(done.context_used, Some(ctx));
        assert_eq!(done.function_calls, 1);
        assert!(done.prompt_strength.is_some());
    }

    #[test]
    fn frames_after_terminal_state_are_ignored() {
        let mut acc = opened();
        acc.apply(Frame::text("ok"));
        acc.apply(Frame::complete(ContextUsed::default(), 0));

        assert_eq!(acc.apply(Frame::text(" more")), Applied::Ignored);
        assert_eq!(acc.apply(Frame::error("late")), Applied::Ignored);
        assert_eq!(acc.message().unwrap().content, "ok");
        assert_eq!(acc.state(), ConsumerState::Complete);
        assert!(acc.notice().is_none());
    }

    #[test]
    fn frames_before_open_are_ignored() {
        let mut acc = TurnAccumulator::new();
        assert_eq!(acc.apply(Frame::text("stray")), Applied::Ignored);
        assert!(acc.message().is_none());
    }

    #[test]
    fn abandon_then_reset() {
        let mut acc = opened();
        acc.apply(Frame::text("Đang tra"));
        let done = acc.abandon("no data for 90s").unwrap();
        assert_eq!(done.status, TurnStatus::Abandoned);
        assert_eq!(done.message.as_ref().unwrap().content, "Đang tra");
        assert!(!done.message.unwrap().finalized);

        // Already terminal.
        assert!(acc.abandon("again").is_none());

        acc.reset();
        assert_eq!(acc.state(), ConsumerState::Idle);
        assert!(acc.message().is_none());
        assert!(acc.open(MessageId::from("asst-2")));
    }

    #[test]
    fn open_refused_mid_turn() {
        let mut acc = opened();
        acc.apply(Frame::text("x"));
        assert!(!acc.open(MessageId::from("other")));
        assert_eq!(acc.message().unwrap().id, MessageId::from("asst-1"));
    }

    #[test]
    fn strength_uses_server_summary() {
        let mut acc = opened();
        acc.apply(Frame::FunctionResults(vec![result("getDetailedGrades")]));
        acc.apply(Frame::text("Minh học tốt."));
        let ctx = ContextUsed {
            students: 1,
            subjects: 2,
            grades: 4,
            ..ContextUsed::default()
        };
        acc.apply(Frame::complete(ctx, 1));

        let done = acc.result().unwrap();
        assert_eq!(done.context_used, Some(ctx));
        // 0.3 + 0.1 + 6 * 0.02 + 0.1
        assert!((done.prompt_strength.unwrap() - 0.62).abs() < 1e-9);
    }
}
