//! Model-facing half of the gateway: provider abstraction, the tool
//! registry the model may call, and the per-turn orchestrator.

pub mod openai;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod stream;
pub mod tools;

pub use openai::OpenAiProvider;
pub use orchestrator::{TurnOrchestrator, TurnOutcome, TurnSettings};
pub use prompt::PromptBuilder;
pub use provider::{LlmProvider, ProviderError};
pub use tools::{Dispatcher, ToolName};
