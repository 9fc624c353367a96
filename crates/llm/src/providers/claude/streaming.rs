//! [`ToolAwareLlmProvider`] trait implementation for the Claude streaming API.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use desk_tool_runtime::provider::EventStream;
use desk_tool_runtime::{LlmError, ToolAwareLlmProvider, TurnRequest};

use super::sse::SseDecoder;
use super::translate::{messages_to_claude, system_to_claude, tool_definition_to_claude};
use crate::providers::stream;

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude (Anthropic) provider with streaming tool-use support.
///
/// Uses the Anthropic Messages API (`/v1/messages`) with `stream: true` to emit
/// incremental [`StreamEvent`]s that the agentic loop can consume.
pub struct ClaudeToolProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ClaudeToolProvider {
    /// Create a new Claude tool provider.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g. `"claude-sonnet-4-20250514"`)
    /// * `base_url` - API base URL (e.g. `"https://api.anthropic.com"`)
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a provider with the default model and endpoint.
    pub fn with_defaults(api_key: String) -> Self {
        Self::new(api_key, DEFAULT_CLAUDE_MODEL.to_string(), ANTHROPIC_API_URL.to_string())
    }

    /// JSON body of a streaming Messages API call.
    pub(super) fn request_body(&self, request: &TurnRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages_to_claude(&request.messages, request.cache),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(tool_definition_to_claude).collect();
            body["tools"] = json!(tools);
        }

        if let Some(system) = system_to_claude(request.system_prompt.as_deref(), &request.messages) {
            body["system"] = system;
        }

        body
    }
}

#[async_trait]
impl ToolAwareLlmProvider for ClaudeToolProvider {
    async fn stream_with_tools(&self, request: TurnRequest) -> Result<EventStream, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(&request);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting Claude streaming request"
        );

        let response = stream::send(
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&body),
            "anthropic",
        )
        .await?;

        Ok(stream::decode_events(response, SseDecoder::new()))
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}
