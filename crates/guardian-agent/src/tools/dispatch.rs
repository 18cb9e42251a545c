//! Routes tool calls to handlers and turns every outcome into a [`ToolResult`].
//!
//! Handlers are synchronous SQLite reads, so each call runs on the blocking
//! pool. A failing or panicking handler only affects its own result.

use std::sync::Arc;

use futures_util::future::join_all;
use guardian_core::types::ActorId;
use guardian_protocol::{FunctionResult, ToolResult};
use guardian_records::RecordStore;
use tracing::{debug, warn};

use super::{children, feedback, grades, notifications, violations};
use super::{ContextTally, DispatchError, ToolName, ToolOutput};
use crate::provider::ToolCall;

/// Result of one tool call, in the order the model issued it.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Provider-assigned call id, echoed back in the tool message.
    pub call_id: String,
    pub name: String,
    pub result: ToolResult,
    /// Empty for error results.
    pub tally: ContextTally,
}

impl DispatchOutcome {
    pub fn function_result(&self) -> FunctionResult {
        FunctionResult {
            name: self.name.clone(),
            result: self.result.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Run one tool call for `actor`. Never fails: errors come back as
    /// `{ "error": reason }`.
    pub async fn dispatch(&self, name: &str, args: serde_json::Value, actor: &ActorId) -> ToolResult {
        self.dispatch_with_tally(name, args, actor).await.0
    }

    /// Like [`dispatch`](Self::dispatch), also returning the data points touched.
    pub async fn dispatch_with_tally(
        &self,
        name: &str,
        args: serde_json::Value,
        actor: &ActorId,
    ) -> (ToolResult, ContextTally) {
        let tool = match name.parse::<ToolName>() {
            Ok(t) => t,
            Err(e) => {
                warn!(tool = %name, "model requested unknown tool");
                return (ToolResult::failure(e.to_string()), ContextTally::default());
            }
        };

        let store = Arc::clone(&self.store);
        let caller = actor.clone();
        let joined =
            tokio::task::spawn_blocking(move || run_handler(tool, store.as_ref(), &caller, args)).await;

        let outcome = match joined {
            Ok(r) => r,
            Err(e) => Err(DispatchError::HandlerFailed {
                tool,
                reason: if e.is_panic() {
                    "handler panicked".to_string()
                } else {
                    "handler cancelled".to_string()
                },
            }),
        };

        match outcome {
            Ok(out) => {
                debug!(tool = %tool, actor = %actor, "tool call succeeded");
                (ToolResult::success(out.payload), out.tally)
            }
            Err(e) => {
                match &e {
                    DispatchError::Store { .. } | DispatchError::HandlerFailed { .. } => {
                        warn!(tool = %tool, actor = %actor, error = %e, "tool call failed")
                    }
                    _ => debug!(tool = %tool, actor = %actor, error = %e, "tool call rejected"),
                }
                (ToolResult::failure(e.to_string()), ContextTally::default())
            }
        }
    }

    /// Run every call concurrently. Results keep the order of `calls`.
    pub async fn dispatch_all(&self, actor: &ActorId, calls: &[ToolCall]) -> Vec<DispatchOutcome> {
        let futures = calls.iter().map(|call| async move {
            let (result, tally) = self
                .dispatch_with_tally(&call.name, call.input.clone(), actor)
                .await;
            DispatchOutcome {
                call_id: call.id.clone(),
                name: call.name.clone(),
                result,
                tally,
            }
        });
        join_all(futures).await
    }
}

fn run_handler(
    tool: ToolName,
    store: &dyn RecordStore,
    actor: &ActorId,
    args: serde_json::Value,
) -> Result<ToolOutput, DispatchError> {
    match tool {
        ToolName::ChildrenList => children::run(store, actor, args),
        ToolName::DetailedGrades => grades::run(store, actor, args),
        ToolName::TeacherFeedback => feedback::run(store, actor, args),
        ToolName::Violations => violations::run(store, actor, args),
        ToolName::Notifications => notifications::run(store, actor, args),
    }
}
