use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::ActorRole;

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_MESSAGE_CHARS: usize = 8 * 1024; // per user message
pub const MAX_HISTORY_ENTRIES: usize = 200; // hard cap on request history length

/// Top-level config (guardian.toml + GUARDIAN_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Bearer tokens accepted by the gateway and the roles allowed to chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_allowed_roles")]
    pub allowed_roles: Vec<ActorRole>,
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allowed_roles: default_allowed_roles(),
            tokens: Vec::new(),
        }
    }
}

/// One static credential: `token` resolves to `actor_id` with `role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub actor_id: String,
    pub role: ActorRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Seconds the orchestrator waits for the next model stream event.
    #[serde(default = "default_agent_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Most recent history entries forwarded to the model.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Optional file replacing the built-in system prompt.
    pub system_prompt_path: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            idle_timeout_secs: default_agent_idle_timeout(),
            max_history: default_max_history(),
            system_prompt_path: None,
        }
    }
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_provider_base_url(),
            chat_path: default_chat_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Settings for the terminal client (`guardian-chat`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_base_url")]
    pub base_url: String,
    pub token: Option<String>,
    /// Seconds without a chunk before the client abandons a turn.
    #[serde(default = "default_client_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_client_base_url(),
            token: None,
            idle_timeout_secs: default_client_idle_timeout(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_allowed_roles() -> Vec<ActorRole> {
    vec![ActorRole::Parent]
}
fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_agent_idle_timeout() -> u64 {
    60
}
fn default_max_history() -> usize {
    40
}
fn default_provider_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}
fn default_chat_path() -> String {
    "/chat/completions".to_string()
}
fn default_client_base_url() -> String {
    format!("http://{}:{}", DEFAULT_BIND, DEFAULT_PORT)
}
fn default_client_idle_timeout() -> u64 {
    90
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.guardian/guardian.db", home)
}

impl GuardianConfig {
    /// Load config from a TOML file with GUARDIAN_* env var overrides.
    ///
    /// Nested keys use a double underscore: `GUARDIAN_AGENT__MODEL=...`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("GUARDIAN_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::GuardianError::Config(e.to_string()))
    }

    pub fn role_allowed(&self, role: ActorRole) -> bool {
        self.auth.allowed_roles.contains(&role)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.guardian/guardian.toml", home)
}
