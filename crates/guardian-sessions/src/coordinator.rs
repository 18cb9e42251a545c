//! The single writer of conversation and message records for one chat
//! session.
//!
//! The conversation is created lazily by the first save and never twice:
//! concurrent callers of [`PersistenceCoordinator::ensure_conversation`] share
//! one creation. Saves run as spawned tasks so the UI never waits on them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use guardian_core::types::{ActorId, ConversationId};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::store::ConversationStore;
use crate::types::{SaveMessage, StoredMessage};

#[derive(Clone)]
pub struct PersistenceCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ConversationStore>,
    actor: ActorId,
    conversation: OnceCell<ConversationId>,
}

impl PersistenceCoordinator {
    /// Coordinator for a fresh session; no conversation exists yet.
    pub fn new(store: Arc<dyn ConversationStore>, actor: ActorId) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                actor,
                conversation: OnceCell::new(),
            }),
        }
    }

    /// Coordinator that continues an existing conversation owned by `actor`.
    pub async fn resume(
        store: Arc<dyn ConversationStore>,
        actor: ActorId,
        id: ConversationId,
    ) -> Result<Self> {
        if store.get_conversation(&actor, &id).await?.is_none() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        info!(actor = %actor, conversation = %id, "resuming conversation");
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                actor,
                conversation: OnceCell::new_with(Some(id)),
            }),
        })
    }

    pub fn actor(&self) -> &ActorId {
        &self.inner.actor
    }

    /// Id of the session's conversation, if one has been created or resumed.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.conversation.get().cloned()
    }

    /// Return the session's conversation id, creating the conversation on
    /// first use. A failed creation is not cached; the next call retries.
    pub async fn ensure_conversation(&self) -> Result<ConversationId> {
        self.inner.ensure_conversation().await
    }

    /// Persist one message in the background.
    ///
    /// The returned handle resolves to the save result; dropping it leaves
    /// the save running. Failures are logged here so an ignored handle still
    /// leaves a trace.
    pub fn save_message(&self, message: SaveMessage) -> SaveHandle {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let message_id = message.id.clone();
            let result = async {
                let conversation = inner.ensure_conversation().await?;
                inner
                    .store
                    .save_message(&inner.actor, &conversation, message)
                    .await
            }
            .await;
            match &result {
                Ok(stored) => debug!(
                    conversation = %stored.conversation_id,
                    message = %stored.id,
                    role = %stored.role,
                    "message saved"
                ),
                Err(e) => warn!(
                    actor = %inner.actor,
                    message = %message_id,
                    error = %e,
                    "failed to save message"
                ),
            }
            result
        });
        SaveHandle { handle }
    }

    pub async fn get_messages(&self) -> Result<Vec<StoredMessage>> {
        match self.conversation_id() {
            Some(id) => self.inner.store.get_messages(&self.inner.actor, &id).await,
            None => Ok(Vec::new()),
        }
    }
}

impl Inner {
    async fn ensure_conversation(&self) -> Result<ConversationId> {
        let id = self
            .conversation
            .get_or_try_init(|| async {
                let conv = self.store.create_conversation(&self.actor).await?;
                info!(actor = %self.actor, conversation = %conv.id, "conversation created");
                Ok::<_, StoreError>(conv.id)
            })
            .await?;
        Ok(id.clone())
    }
}

/// Observable result of a background save.
#[derive(Debug)]
pub struct SaveHandle {
    handle: JoinHandle<Result<StoredMessage>>,
}

impl SaveHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for SaveHandle {
    type Output = Result<StoredMessage>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(StoreError::Unavailable(format!("save task failed: {e}"))),
        })
    }
}
