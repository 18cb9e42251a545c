//! Streaming chat turn: POST /api/chat
//!
//! Auth: `Authorization: Bearer <token>`; the caller's role must be allowed.
//!
//! Request:  `{"message": "...", "history": [{"role": "user"|"model", "content": "..."}]}`
//! Response: `text/event-stream`, one `data: <frame json>` record per frame,
//!           ending with a `complete` or `error` frame.
//! Errors before the stream opens are plain JSON: 400, 401, 403 or 409.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use guardian_agent::TurnOutcome;
use guardian_core::GuardianError;
use guardian_protocol::{encode, Frame, TurnRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::auth::authorize;
use crate::error::ApiError;

/// Frames buffered between the orchestrator and a slow client.
const FRAME_BUFFER: usize = 64;

/// POST /api/chat: run one turn and stream its frames.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let actor = authorize(&state, &headers).await?;

    let Json(request) =
        body.map_err(|e| ApiError(GuardianError::InvalidRequest(e.body_text())))?;
    request.validate()?;

    let slot = state.begin_turn(&actor.id)?;
    info!(
        actor = %actor.id,
        chars = request.message.chars().count(),
        history = request.history.len(),
        "turn started"
    );

    let (tx, mut rx) = mpsc::channel::<Frame>(FRAME_BUFFER);
    let cancel = CancellationToken::new();

    let turn_state = Arc::clone(&state);
    let turn_cancel = cancel.clone();
    tokio::spawn(async move {
        // The slot lives until the orchestrator returns, not until the
        // client stops reading.
        let _slot = slot;
        let outcome = turn_state
            .orchestrator
            .run_turn(&actor, &request, tx, turn_cancel)
            .await;
        match outcome {
            TurnOutcome::Completed { function_calls, .. } => {
                debug!(actor = %actor.id, function_calls, "turn finished")
            }
            TurnOutcome::Failed { message } => {
                debug!(actor = %actor.id, error = %message, "turn finished with error")
            }
            TurnOutcome::Cancelled => debug!(actor = %actor.id, "turn abandoned by client"),
        }
    });

    // Dropping the body (client disconnect) drops the guard, which cancels
    // the turn.
    let guard = cancel.drop_guard();
    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            match encode(&frame) {
                Ok(record) => yield Ok::<_, Infallible>(Bytes::from(record)),
                Err(e) => warn!(kind = frame.kind(), error = %e, "failed to encode frame"),
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError(GuardianError::Internal(e.to_string())))
}
