//! Durable conversations: the SQLite store, the store trait the client and
//! gateway share, and the coordinator that owns every write.

pub mod coordinator;
pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use coordinator::{PersistenceCoordinator, SaveHandle};
pub use error::StoreError;
pub use store::{ConversationStore, SqliteConversationStore};
pub use types::{Conversation, SaveMessage, StoredMessage};
