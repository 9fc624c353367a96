use crate::conversation::ConversationMessage;
use crate::stream::StreamEvent;
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// Prompt caching requested for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheHint {
    #[default]
    None,
    /// Mark the conversation tail with an ephemeral cache breakpoint.
    Ephemeral,
}

impl CacheHint {
    /// Cache policy for a provider/model pair.
    pub fn for_model(provider: &str, model: &str) -> Self {
        match provider {
            "anthropic" => CacheHint::Ephemeral,
            "openrouter" | "requesty" if model.starts_with("anthropic/") => CacheHint::Ephemeral,
            _ => CacheHint::None,
        }
    }
}

/// Everything a provider needs for one model turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub cache: CacheHint,
}

/// Trait for LLM providers that support tool use and streaming.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the agentic loop), not the provider.
/// Implementations live in crates/llm or adapter crates.
#[async_trait]
pub trait ToolAwareLlmProvider: Send + Sync {
    /// Stream a response from the LLM with tool definitions available.
    async fn stream_with_tools(&self, request: TurnRequest) -> Result<EventStream, LlmError>;

    /// Non-streaming convenience: collects the full response.
    async fn complete_with_tools(&self, request: TurnRequest) -> Result<Vec<StreamEvent>, LlmError> {
        use futures::StreamExt;
        let stream = self.stream_with_tools(request).await?;
        let events: Vec<_> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Provider name for logging/debugging (e.g., "anthropic", "openai")
    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed: invalid API key")]
    AuthError,
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Transient failures worth another attempt with the same inputs.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::NetworkError(_) => true,
            LlmError::ApiError { status, .. } => matches!(status, 408 | 409 | 429) || *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

/// Mock LLM provider for testing the agentic loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::stream::FinishReason;
    use crate::usage::TokenUsage;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type ScriptedTurn = Result<Vec<StreamEvent>, LlmError>;

    /// A mock provider that replays queued turns in order and records requests.
    #[derive(Default)]
    pub struct MockLlmProvider {
        turns: Mutex<VecDeque<ScriptedTurn>>,
        requests: Mutex<Vec<TurnRequest>>,
    }

    pub fn end(finish_reason: FinishReason) -> StreamEvent {
        StreamEvent::MessageEnd {
            finish_reason,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            provider_metadata: serde_json::Value::Null,
        }
    }

    impl MockLlmProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a response that will be returned after those already queued.
        pub fn queue_response(&self, events: Vec<StreamEvent>) {
            self.turns.lock().unwrap().push_back(Ok(events));
        }

        /// Queue a failure of the stream request itself.
        pub fn queue_error(&self, error: LlmError) {
            self.turns.lock().unwrap().push_back(Err(error));
        }

        /// Queue a simple text response.
        pub fn queue_text(&self, text: &str) {
            self.queue_response(vec![
                StreamEvent::TextDelta {
                    text: text.to_string(),
                },
                end(FinishReason::Stop),
            ]);
        }

        /// Queue a turn consisting of one tool call.
        pub fn queue_tool_call(&self, id: &str, name: &str, arguments: &str) {
            self.queue_response(vec![
                StreamEvent::ToolCallStart {
                    id: id.to_string(),
                    name: name.to_string(),
                },
                StreamEvent::ToolCallDelta {
                    id: id.to_string(),
                    arguments_delta: arguments.to_string(),
                },
                StreamEvent::ToolCallEnd { id: id.to_string() },
                end(FinishReason::ToolCalls),
            ]);
        }

        pub fn requests(&self) -> Vec<TurnRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn remaining(&self) -> usize {
            self.turns.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolAwareLlmProvider for MockLlmProvider {
        async fn stream_with_tools(&self, request: TurnRequest) -> Result<EventStream, LlmError> {
            self.requests.lock().unwrap().push(request);
            let events = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![end(FinishReason::Stop)]))?;
            Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
