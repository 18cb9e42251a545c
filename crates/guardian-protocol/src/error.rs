use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A complete record was seen but its JSON body did not decode as a frame.
    #[error("malformed frame: {reason} (record: {record})")]
    MalformedFrame { reason: String, record: String },

    /// A single record grew past the decoder's buffer cap without a newline.
    #[error("record exceeds {max} bytes")]
    RecordTooLarge { max: usize },

    #[error("invalid turn request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
