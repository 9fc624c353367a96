//! Model providers for the agent loop.

pub mod providers;

pub use providers::claude::{ClaudeToolProvider, ANTHROPIC_API_URL, DEFAULT_CLAUDE_MODEL};
pub use providers::openai::{OpenAiCompatibleProvider, OpenAiFlavor};
pub use providers::{create_provider, default_model};
