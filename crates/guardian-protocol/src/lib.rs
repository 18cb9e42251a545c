//! Wire protocol for the chat push-stream: frame types, the SSE-style
//! record codec, the turn request body and the prompt-strength heuristic
//! shown next to finished answers.

pub mod codec;
pub mod error;
pub mod frames;
pub mod request;
pub mod strength;

pub use codec::{encode, FrameDecoder};
pub use error::ProtocolError;
pub use frames::{CompletePayload, ContextUsed, ErrorPayload, Frame, FunctionResult, ToolResult};
pub use request::{HistoryEntry, HistoryRole, TurnRequest};
