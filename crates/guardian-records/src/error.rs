use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, RecordError>;
