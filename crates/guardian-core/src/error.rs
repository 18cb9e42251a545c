use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardianError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Turn already in progress for actor {actor}")]
    TurnInProgress { actor: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardianError {
    /// Short error code string sent to clients in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GuardianError::Config(_) => "CONFIG_ERROR",
            GuardianError::AuthFailed(_) => "AUTH_FAILED",
            GuardianError::PermissionDenied { .. } => "PERMISSION_DENIED",
            GuardianError::InvalidRequest(_) => "INVALID_REQUEST",
            GuardianError::TurnInProgress { .. } => "TURN_IN_PROGRESS",
            GuardianError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            GuardianError::Database(_) => "DATABASE_ERROR",
            GuardianError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            GuardianError::Serialization(_) => "SERIALIZATION_ERROR",
            GuardianError::Io(_) => "IO_ERROR",
            GuardianError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardianError>;
