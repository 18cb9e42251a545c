use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use guardian_agent::TurnOrchestrator;
use guardian_core::config::GuardianConfig;
use guardian_core::types::ActorId;
use guardian_core::GuardianError;
use guardian_sessions::ConversationStore;

use crate::auth::ActorResolver;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: GuardianConfig,
    pub orchestrator: TurnOrchestrator,
    pub resolver: Arc<dyn ActorResolver>,
    pub conversations: Arc<dyn ConversationStore>,
    /// Actors with a turn currently streaming. One turn per actor.
    pub active_turns: DashMap<ActorId, ()>,
}

impl AppState {
    pub fn new(
        config: GuardianConfig,
        orchestrator: TurnOrchestrator,
        resolver: Arc<dyn ActorResolver>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            resolver,
            conversations,
            active_turns: DashMap::new(),
        }
    }

    /// Claim the actor's turn slot. The slot is released when the returned
    /// guard is dropped.
    pub fn begin_turn(self: &Arc<Self>, actor: &ActorId) -> Result<TurnSlot, GuardianError> {
        use dashmap::mapref::entry::Entry;

        match self.active_turns.entry(actor.clone()) {
            Entry::Occupied(_) => Err(GuardianError::TurnInProgress {
                actor: actor.to_string(),
            }),
            Entry::Vacant(v) => {
                v.insert(());
                Ok(TurnSlot {
                    state: Arc::clone(self),
                    actor: actor.clone(),
                })
            }
        }
    }
}

/// Held for the lifetime of one streaming turn.
pub struct TurnSlot {
    state: Arc<AppState>,
    actor: ActorId,
}

impl Drop for TurnSlot {
    fn drop(&mut self) {
        self.state.active_turns.remove(&self.actor);
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/api/chat", post(crate::http::chat::chat_handler))
        .route(
            "/api/conversations",
            post(crate::http::conversations::create_conversation)
                .get(crate::http::conversations::list_conversations),
        )
        .route(
            "/api/conversations/{id}",
            get(crate::http::conversations::get_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            post(crate::http::conversations::save_message)
                .get(crate::http::conversations::get_messages),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
