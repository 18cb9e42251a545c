//! [`ConversationStore`] backed by the gateway's conversation endpoints.
//!
//! The gateway scopes every call to the bearer token, so the `actor`
//! arguments only label log lines here.

use async_trait::async_trait;
use guardian_core::types::{ActorId, ConversationId};
use guardian_sessions::{Conversation, ConversationStore, SaveMessage, StoreError, StoredMessage};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ClientError;
use crate::turn::{check_status, GatewayClient};

pub struct HttpConversationStore {
    client: GatewayClient,
}

impl HttpConversationStore {
    pub fn new(client: GatewayClient) -> Self {
        Self { client }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, StoreError> {
        let resp = builder.send().await.map_err(transport)?;
        let resp = check_status(resp).await.map_err(into_store_error)?;
        resp.json().await.map_err(transport)
    }
}

fn messages_path(conversation: &ConversationId) -> String {
    format!("/api/conversations/{conversation}/messages")
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

fn into_store_error(e: ClientError) -> StoreError {
    match e {
        ClientError::Rejected {
            status, message, ..
        } if status == StatusCode::NOT_FOUND.as_u16() => StoreError::NotFound { id: message },
        ClientError::Rejected {
            status, message, ..
        } if status == StatusCode::BAD_REQUEST.as_u16() => StoreError::InvalidMessage(message),
        ClientError::Store(inner) => inner,
        other => StoreError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ConversationStore for HttpConversationStore {
    async fn create_conversation(&self, actor: &ActorId) -> Result<Conversation, StoreError> {
        debug!(actor = %actor, "creating conversation via gateway");
        self.call(self.client.request(Method::POST, "/api/conversations"))
            .await
    }

    async fn get_conversation(
        &self,
        _actor: &ActorId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let path = format!("/api/conversations/{id}");
        match self.call(self.client.request(Method::GET, &path)).await {
            Ok(conversation) => Ok(Some(conversation)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_conversations(
        &self,
        _actor: &ActorId,
        limit: usize,
    ) -> Result<Vec<Conversation>, StoreError> {
        let builder = self
            .client
            .request(Method::GET, "/api/conversations")
            .query(&[("limit", limit)]);
        self.call(builder).await
    }

    async fn save_message(
        &self,
        _actor: &ActorId,
        conversation: &ConversationId,
        message: SaveMessage,
    ) -> Result<StoredMessage, StoreError> {
        let builder = self
            .client
            .request(Method::POST, &messages_path(conversation))
            .json(&message);
        self.call(builder).await
    }

    async fn get_messages(
        &self,
        _actor: &ActorId,
        conversation: &ConversationId,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.call(self.client.request(Method::GET, &messages_path(conversation)))
            .await
    }
}
