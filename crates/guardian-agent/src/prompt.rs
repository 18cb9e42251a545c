use std::path::Path;

use guardian_core::types::ActorRole;
use tracing::{info, warn};

/// Per-file size cap (characters) for an operator-supplied prompt.
const MAX_PROMPT_CHARS: usize = 20_000;

const DEFAULT_PROMPT: &str = "\
You are a helpful school assistant talking with a parent about their own children.

Rules:
- Answer only from data returned by the available tools. Never invent grades, \
feedback, violations or notifications.
- When the parent mentions a child by name, call the relevant tool with that name.
- If a tool returns an error, explain it plainly and suggest what the parent can ask instead.
- Keep answers short, warm and concrete. Reply in the language the parent writes in.";

/// Builds the system prompt sent ahead of every model call.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    base: String,
}

impl PromptBuilder {
    /// Load the base prompt from `path`, falling back to the built-in prompt
    /// when no path is configured or the file cannot be read.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => {
                let base: String = text.chars().take(MAX_PROMPT_CHARS).collect();
                info!(path = %path.display(), chars = base.chars().count(), "loaded system prompt");
                Self { base }
            }
            Ok(_) => {
                warn!(path = %path.display(), "system prompt file is empty, using built-in prompt");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read system prompt, using built-in prompt");
                Self::default()
            }
        }
    }

    pub fn from_text(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Final prompt for one turn: the base text plus a volatile tail with the
    /// caller's role and today's date.
    pub fn build(&self, role: ActorRole) -> String {
        let today = chrono::Local::now().format("%Y-%m-%d");
        format!(
            "{}\n\nCaller role: {}\nToday's date: {}",
            self.base, role, today
        )
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            base: DEFAULT_PROMPT.to_string(),
        }
    }
}
