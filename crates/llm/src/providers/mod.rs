pub mod claude;
pub mod openai;
pub(crate) mod stream;

use std::sync::Arc;

use desk_tool_runtime::{LlmError, ToolAwareLlmProvider};

use self::openai::{OpenAiCompatibleProvider, OpenAiFlavor};

/// Model used when the profile names none.
pub fn default_model(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" | "claude" => Some(claude::DEFAULT_CLAUDE_MODEL),
        other => OpenAiFlavor::from_name(other).map(OpenAiFlavor::default_model),
    }
}

fn require_key<'a>(provider: &str, api_key: Option<&'a str>) -> Result<&'a str, LlmError> {
    api_key.filter(|key| !key.trim().is_empty()).ok_or_else(|| {
        let var = if provider == "claude" { "anthropic" } else { provider };
        anyhow::anyhow!("{}_API_KEY not set: no API key configured for {provider}", var.to_uppercase()).into()
    })
}

/// Create the provider named by a profile.
///
/// `api_key` and `model` arrive already resolved by the caller; `model`
/// falls back to the provider default when empty.
pub fn create_provider(
    provider: &str,
    api_key: Option<&str>,
    model: &str,
    base_url: Option<&str>,
) -> Result<Arc<dyn ToolAwareLlmProvider>, LlmError> {
    match provider {
        "anthropic" | "claude" => {
            let api_key = require_key(provider, api_key)?;
            let model = if model.is_empty() {
                claude::DEFAULT_CLAUDE_MODEL
            } else {
                model
            };
            Ok(Arc::new(claude::ClaudeToolProvider::new(
                api_key.to_string(),
                model.to_string(),
                base_url.unwrap_or(claude::ANTHROPIC_API_URL).to_string(),
            )))
        }
        other => match OpenAiFlavor::from_name(other) {
            Some(flavor) => {
                let api_key = require_key(other, api_key)?;
                let model = if model.is_empty() { flavor.default_model() } else { model };
                Ok(Arc::new(OpenAiCompatibleProvider::new(
                    flavor,
                    api_key.to_string(),
                    model.to_string(),
                    base_url.unwrap_or(flavor.default_base_url()).to_string(),
                )))
            }
            None => Err(anyhow::anyhow!("unknown LLM provider: '{}'", other).into()),
        },
    }
}
