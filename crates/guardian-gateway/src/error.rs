//! HTTP mapping for gateway errors: `(status, {"error", "code"})`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use guardian_core::GuardianError;
use guardian_protocol::ProtocolError;
use guardian_sessions::StoreError;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// Error returned by every handler. Nothing is streamed before one of these.
#[derive(Debug)]
pub struct ApiError(pub GuardianError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GuardianError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            GuardianError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            GuardianError::InvalidRequest(_) | GuardianError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            GuardianError::TurnInProgress { .. } => StatusCode::CONFLICT,
            GuardianError::ConversationNotFound { .. } => StatusCode::NOT_FOUND,
            GuardianError::LlmProvider(_) => StatusCode::BAD_GATEWAY,
            GuardianError::Config(_)
            | GuardianError::Database(_)
            | GuardianError::Io(_)
            | GuardianError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(code = self.0.code(), error = %self.0, "request failed");
        }
        let body = ApiErrorBody {
            error: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<GuardianError> for ApiError {
    fn from(e: GuardianError) -> Self {
        Self(e)
    }
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        Self(GuardianError::InvalidRequest(e.to_string()))
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(match e {
            StoreError::NotFound { id } => GuardianError::ConversationNotFound { id },
            StoreError::InvalidMessage(msg) => GuardianError::InvalidRequest(msg),
            StoreError::Database(e) => GuardianError::Database(e.to_string()),
            other => GuardianError::Internal(other.to_string()),
        })
    }
}
