//! Conversation persistence endpoints. Every route is scoped to the
//! authenticated caller; another actor's conversation is a 404.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use guardian_core::types::ConversationId;
use guardian_core::GuardianError;
use guardian_sessions::{Conversation, SaveMessage, StoredMessage};
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::auth::authorize;
use crate::error::ApiError;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// POST /api/conversations: create an empty conversation.
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let actor = authorize(&state, &headers).await?;
    let conversation = state.conversations.create_conversation(&actor.id).await?;
    info!(actor = %actor.id, conversation = %conversation.id, "conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /api/conversations?limit=N: the caller's conversations, newest activity first.
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let actor = authorize(&state, &headers).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let list = state.conversations.list_conversations(&actor.id, limit).await?;
    Ok(Json(list))
}

/// GET /api/conversations/{id}
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let actor = authorize(&state, &headers).await?;
    state
        .conversations
        .get_conversation(&actor.id, &ConversationId(id.clone()))
        .await?
        .map(Json)
        .ok_or(ApiError(GuardianError::ConversationNotFound { id }))
}

/// POST /api/conversations/{id}/messages: save one message.
pub async fn save_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<SaveMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<StoredMessage>), ApiError> {
    let actor = authorize(&state, &headers).await?;
    let Json(message) =
        body.map_err(|e| ApiError(GuardianError::InvalidRequest(e.body_text())))?;
    let stored = state
        .conversations
        .save_message(&actor.id, &ConversationId(id), message)
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// GET /api/conversations/{id}/messages: messages in creation order.
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let actor = authorize(&state, &headers).await?;
    let messages = state
        .conversations
        .get_messages(&actor.id, &ConversationId(id))
        .await?;
    Ok(Json(messages))
}
