//! Terminal-side pieces of a Guardian chat: the streamed-turn consumer, the
//! gateway HTTP client and a session that persists both sides of each turn.

pub mod consumer;
pub mod error;
pub mod session;
pub mod store;
pub mod turn;

pub use consumer::{ConsumerState, TurnAccumulator, TurnResult, TurnStatus, APOLOGY_TEXT};
pub use error::ClientError;
pub use session::{ChatSession, CompletedTurn, PendingTurn};
pub use store::HttpConversationStore;
pub use turn::GatewayClient;
