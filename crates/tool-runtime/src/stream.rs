use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::TokenUsage;

/// Events emitted during streaming LLM responses.
/// Provider-agnostic; translated from wire formats in the provider layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A chunk of answer text
    TextDelta {
        text: String,
    },
    /// A chunk of model reasoning ("thinking")
    ReasoningDelta {
        text: String,
    },
    /// Start of a tool call (LLM wants to execute a tool)
    ToolCallStart {
        id: String,
        name: String,
    },
    /// Incremental JSON argument data for a tool call
    ToolCallDelta {
        id: String,
        arguments_delta: String,
    },
    /// Tool call arguments are complete
    ToolCallEnd {
        id: String,
    },
    /// The entire message is complete
    MessageEnd {
        finish_reason: FinishReason,
        usage: TokenUsage,
        /// Provider-specific cache/cost counters, keyed by provider name.
        provider_metadata: Value,
    },
    /// An error occurred during streaming
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Model wants to use tools
    ToolCalls,
    /// Normal end of response
    Stop,
    /// Hit max tokens limit
    Length,
    Error,
    Unknown,
    Other,
}

impl FinishReason {
    /// Finish reasons that may be retried without changing inputs.
    pub fn is_ambiguous(self) -> bool {
        matches!(self, FinishReason::Unknown | FinishReason::Other)
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
            FinishReason::Unknown => "unknown",
            FinishReason::Other => "other",
        };
        f.write_str(s)
    }
}

/// A tool call as streamed by the model, arguments still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Folds the events of one model turn into its text, reasoning, tool calls
/// and terminal metadata.
#[derive(Debug, Default)]
pub struct TurnCollector {
    pub text: String,
    pub reasoning: String,
    calls: IndexMap<String, RawToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: TokenUsage,
    pub provider_metadata: Value,
    /// Last in-stream error reported by the provider.
    pub error: Option<String>,
}

impl TurnCollector {
    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => self.text.push_str(text),
            StreamEvent::ReasoningDelta { text } => self.reasoning.push_str(text),
            StreamEvent::ToolCallStart { id, name } => {
                self.calls.insert(
                    id.clone(),
                    RawToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    },
                );
            }
            StreamEvent::ToolCallDelta { id, arguments_delta } => {
                if let Some(call) = self.calls.get_mut(id) {
                    call.arguments.push_str(arguments_delta);
                }
            }
            StreamEvent::ToolCallEnd { .. } => {}
            StreamEvent::MessageEnd {
                finish_reason,
                usage,
                provider_metadata,
            } => {
                self.finish_reason = Some(*finish_reason);
                self.usage = *usage;
                self.provider_metadata = provider_metadata.clone();
            }
            StreamEvent::Error { message } => self.error = Some(message.clone()),
        }
    }

    /// Tool calls in the order the model started them.
    pub fn tool_calls(&self) -> Vec<RawToolCall> {
        self.calls.values().cloned().collect()
    }

    /// Finish reason of the turn; a stream that ended without one is `unknown`,
    /// or `error` when the provider reported an error.
    pub fn finish_reason(&self) -> FinishReason {
        match (self.finish_reason, &self.error) {
            (Some(reason), _) => reason,
            (None, Some(_)) => FinishReason::Error,
            (None, None) => FinishReason::Unknown,
        }
    }
}
