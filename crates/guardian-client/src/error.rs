use guardian_protocol::ProtocolError;
use guardian_sessions::StoreError;
use thiserror::Error;

/// Failures that stop a turn from opening, or a request from completing.
///
/// Problems after the stream is open never surface here: they end the turn
/// as `Failed` or `Abandoned` inside the accumulator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a JSON error body instead of a stream.
    #[error("gateway rejected request ({status}, {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// `stream_turn` needs an accumulator that was just opened.
    #[error("turn accumulator is not open")]
    NotOpen,
}

pub type Result<T> = std::result::Result<T, ClientError>;
