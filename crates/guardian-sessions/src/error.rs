use thiserror::Error;

/// Errors that can occur while reading or writing conversations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No conversation with this id is visible to the caller.
    #[error("conversation not found: {id}")]
    NotFound { id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The message body was rejected before reaching storage.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A remote store could not be reached or answered with an error.
    #[error("store transport error: {0}")]
    Transport(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
