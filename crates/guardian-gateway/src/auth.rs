//! Caller identity for HTTP requests.
//!
//! `Authorization: Bearer <token>` is resolved to an [`Actor`] by an
//! [`ActorResolver`]; the actor's role must be one the gateway serves.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use guardian_core::config::AuthConfig;
use guardian_core::types::Actor;
use guardian_core::GuardianError;
use tracing::debug;

use crate::app::AppState;

/// Resolves a bearer token to the caller it was issued to.
#[async_trait]
pub trait ActorResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<Actor>;
}

/// Tokens listed in `[auth] tokens` of the gateway config.
pub struct StaticTokenResolver {
    tokens: HashMap<String, Actor>,
}

impl StaticTokenResolver {
    pub fn from_config(auth: &AuthConfig) -> Self {
        let tokens = auth
            .tokens
            .iter()
            .filter(|t| !t.token.is_empty())
            .map(|t| (t.token.clone(), Actor::new(t.actor_id.as_str(), t.role)))
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl ActorResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Option<Actor> {
        self.tokens.get(token).cloned()
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve and role-check the caller. 401 for a missing or unknown token,
/// 403 for a role the gateway does not serve.
pub async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Actor, GuardianError> {
    let token = extract_bearer(headers).ok_or_else(|| {
        GuardianError::AuthFailed("set 'Authorization: Bearer <token>' header".to_string())
    })?;
    let actor = state
        .resolver
        .resolve(token)
        .await
        .ok_or_else(|| GuardianError::AuthFailed("unknown token".to_string()))?;
    if !state.config.role_allowed(actor.role) {
        debug!(actor = %actor.id, role = %actor.role, "role not allowed");
        return Err(GuardianError::PermissionDenied {
            reason: format!("role '{}' cannot use chat", actor.role),
        });
    }
    Ok(actor)
}
