//! One chat session: the turn stream, the accumulator and persistence glued
//! together.

use guardian_core::types::{MessageId, MessageRole};
use guardian_protocol::{Frame, HistoryEntry, HistoryRole, TurnRequest};
use guardian_sessions::{PersistenceCoordinator, SaveHandle, SaveMessage, StoredMessage};
use tracing::{debug, info};

use crate::consumer::{TurnAccumulator, TurnResult, TurnStatus};
use crate::error::Result;
use crate::turn::GatewayClient;

/// History entries sent with each turn.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Ids and timestamps fixed before the network turn starts.
#[derive(Debug)]
pub struct PendingTurn {
    pub message: String,
    pub user_id: MessageId,
    pub assistant_id: MessageId,
    pub user_created_at: String,
    /// Background save of the user message.
    pub user_save: SaveHandle,
}

/// A finished turn plus the handles of its background saves.
#[derive(Debug)]
pub struct CompletedTurn {
    pub result: TurnResult,
    pub user_save: SaveHandle,
    /// `None` only if the turn ended without an assistant message.
    pub assistant_save: Option<SaveHandle>,
}

pub struct ChatSession {
    client: GatewayClient,
    persistence: PersistenceCoordinator,
    accumulator: TurnAccumulator,
    history: Vec<HistoryEntry>,
    history_window: usize,
}

impl ChatSession {
    pub fn new(client: GatewayClient, persistence: PersistenceCoordinator) -> Self {
        Self {
            client,
            persistence,
            accumulator: TurnAccumulator::new(),
            history: Vec::new(),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_history_window(mut self, entries: usize) -> Self {
        self.history_window = entries;
        self
    }

    pub fn persistence(&self) -> &PersistenceCoordinator {
        &self.persistence
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Seed the model history from saved messages (after a resume).
    ///
    /// Only completed turns count: an assistant message without tool-call
    /// metadata is a fallback or partial answer, so it is skipped together
    /// with the question that led to it. Unanswered questions are skipped too.
    pub fn load_history(&mut self, messages: &[StoredMessage]) {
        let mut history = Vec::new();
        let mut question: Option<&StoredMessage> = None;
        for message in messages {
            match message.role {
                MessageRole::User => question = Some(message),
                MessageRole::Assistant => {
                    let asked = question.take();
                    if message.function_calls.is_none() {
                        continue;
                    }
                    if let Some(asked) = asked {
                        history.push(HistoryEntry {
                            role: HistoryRole::User,
                            content: asked.content.clone(),
                        });
                    }
                    history.push(HistoryEntry {
                        role: HistoryRole::Model,
                        content: message.content.clone(),
                    });
                }
            }
        }
        debug!(stored = messages.len(), kept = history.len(), "history loaded");
        self.history = history;
    }

    /// Assign both message ids, open the accumulator and start saving the
    /// user message. Nothing has touched the network for the turn yet.
    pub fn begin_turn(&mut self, message: impl Into<String>) -> Result<PendingTurn> {
        let message = message.into();
        TurnRequest::new(message.clone()).validate()?;

        let user_id = MessageId::new();
        let assistant_id = MessageId::new();
        let user_created_at = chrono::Utc::now().to_rfc3339();

        self.accumulator.reset();
        self.accumulator.open(assistant_id.clone());

        let user_save = self.persistence.save_message(
            SaveMessage::user(user_id.clone(), message.clone())
                .with_created_at(user_created_at.clone()),
        );
        debug!(user = %user_id, assistant = %assistant_id, "turn prepared");

        Ok(PendingTurn {
            message,
            user_id,
            assistant_id,
            user_created_at,
            user_save,
        })
    }

    /// Run a turn end to end. `on_frame` is called for every accepted frame,
    /// with the accumulator already updated.
    pub async fn send<F>(&mut self, message: impl Into<String>, on_frame: F) -> Result<CompletedTurn>
    where
        F: FnMut(&Frame, &TurnAccumulator),
    {
        let pending = self.begin_turn(message)?;
        let request = TurnRequest {
            message: pending.message.clone(),
            history: self.window(),
        };

        let result = match self
            .client
            .stream_turn(&request, &mut self.accumulator, on_frame)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.accumulator.reset();
                return Err(e);
            }
        };
        Ok(self.finish(pending, result))
    }

    fn finish(&mut self, pending: PendingTurn, result: TurnResult) -> CompletedTurn {
        info!(
            status = ?result.status,
            function_calls = result.function_calls,
            strength = result.prompt_strength.unwrap_or_default(),
            "turn finished"
        );

        let assistant_save = result.message.as_ref().map(|draft| {
            let mut save = SaveMessage::assistant(draft.id.clone(), draft.content.clone())
                .with_created_at(chrono::Utc::now().to_rfc3339());
            if result.status == TurnStatus::Completed {
                save.context_used = result.context_used;
                save.function_calls = Some(result.function_calls);
                save.prompt_strength = result.prompt_strength;
            }
            self.persistence.save_message(save)
        });

        if result.status == TurnStatus::Completed {
            self.history.push(HistoryEntry {
                role: HistoryRole::User,
                content: pending.message,
            });
            if let Some(draft) = &result.message {
                self.history.push(HistoryEntry {
                    role: HistoryRole::Model,
                    content: draft.content.clone(),
                });
            }
        }

        CompletedTurn {
            result,
            user_save: pending.user_save,
            assistant_save,
        }
    }

    fn window(&self) -> Vec<HistoryEntry> {
        let skip = self.history.len().saturating_sub(self.history_window);
        self.history[skip..].to_vec()
    }
}
