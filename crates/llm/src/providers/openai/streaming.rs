//! [`ToolAwareLlmProvider`] trait implementation for streamed chat completions.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use desk_tool_runtime::provider::EventStream;
use desk_tool_runtime::{LlmError, ToolAwareLlmProvider, TurnRequest};

use super::sse::SseDecoder;
use super::translate::{messages_to_openai, tool_definition_to_openai};
use crate::providers::stream;

/// Services reachable through the chat-completions wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiFlavor {
    OpenAi,
    OpenRouter,
    Requesty,
    /// Google's OpenAI-compatible endpoint.
    Gemini,
}

impl OpenAiFlavor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "openai" => Some(OpenAiFlavor::OpenAi),
            "openrouter" => Some(OpenAiFlavor::OpenRouter),
            "requesty" => Some(OpenAiFlavor::Requesty),
            "gemini" => Some(OpenAiFlavor::Gemini),
            _ => None,
        }
    }

    /// Provider name as used in profiles and usage reports.
    pub fn name(self) -> &'static str {
        match self {
            OpenAiFlavor::OpenAi => "openai",
            OpenAiFlavor::OpenRouter => "openrouter",
            OpenAiFlavor::Requesty => "requesty",
            OpenAiFlavor::Gemini => "gemini",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            OpenAiFlavor::OpenAi => "https://api.openai.com/v1",
            OpenAiFlavor::OpenRouter => "https://openrouter.ai/api/v1",
            OpenAiFlavor::Requesty => "https://router.requesty.ai/v1",
            OpenAiFlavor::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            OpenAiFlavor::OpenAi => "gpt-4.1",
            OpenAiFlavor::OpenRouter => "anthropic/claude-sonnet-4",
            OpenAiFlavor::Requesty => "anthropic/claude-sonnet-4-20250514",
            OpenAiFlavor::Gemini => "gemini-2.5-pro",
        }
    }
}

/// Chat-completions provider with streaming tool-use support.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    flavor: OpenAiFlavor,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(flavor: OpenAiFlavor, api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            flavor,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// JSON body of a streaming chat-completions call.
    pub(super) fn request_body(&self, request: &TurnRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages_to_openai(request.system_prompt.as_deref(), &request.messages, request.cache),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(tool_definition_to_openai).collect();
            body["tools"] = json!(tools);
        }

        // OpenRouter reports the billed cost only when asked.
        if self.flavor == OpenAiFlavor::OpenRouter {
            body["usage"] = json!({ "include": true });
        }

        body
    }
}

#[async_trait]
impl ToolAwareLlmProvider for OpenAiCompatibleProvider {
    async fn stream_with_tools(&self, request: TurnRequest) -> Result<EventStream, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(
            provider = self.flavor.name(),
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting chat-completions streaming request"
        );

        let response = stream::send(
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("Content-Type", "application/json")
                .json(&body),
            self.flavor.name(),
        )
        .await?;

        Ok(stream::decode_events(response, SseDecoder::new(self.flavor)))
    }

    fn provider_name(&self) -> &str {
        self.flavor.name()
    }
}
