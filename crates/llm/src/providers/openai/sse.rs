//! SSE decoding for streamed chat completions.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::trace;

use desk_tool_runtime::{FinishReason, StreamEvent, TokenUsage};

use super::streaming::OpenAiFlavor;
use crate::providers::stream::{LineBuffer, SseDecode};

/// Incremental decoder for one streamed completion.
///
/// Tool-call deltas carry only their position after the first chunk, so ids
/// are remembered by index. The message ends on `[DONE]`, or when the body
/// ends after a finish reason; usage usually arrives in a trailing chunk
/// with no choices.
#[derive(Debug)]
pub(super) struct SseDecoder {
    flavor: OpenAiFlavor,
    lines: LineBuffer,
    tool_calls: BTreeMap<u64, String>,
    usage: TokenUsage,
    cached_tokens: Option<u64>,
    caching_tokens: Option<u64>,
    cost: Option<f64>,
    finish_reason: Option<FinishReason>,
    ended: bool,
}

impl SseDecode for SseDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in self.lines.feed(chunk) {
            self.process_line(&line, &mut events);
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.process_line(&line, &mut events);
        }
        if self.finish_reason.is_some() {
            self.end(&mut events);
        }
        events
    }
}

impl SseDecoder {
    pub(super) fn new(flavor: OpenAiFlavor) -> Self {
        Self {
            flavor,
            lines: LineBuffer::default(),
            tool_calls: BTreeMap::new(),
            usage: TokenUsage::default(),
            cached_tokens: None,
            caching_tokens: None,
            cost: None,
            finish_reason: None,
            ended: false,
        }
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        // Comments (": OPENROUTER PROCESSING") and other fields are ignored.
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.end(events);
            return;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(chunk) => self.handle(&chunk, events),
            Err(e) => trace!(error = %e, "ignoring SSE chunk with invalid JSON"),
        }
    }

    fn handle(&mut self, chunk: &Value, events: &mut Vec<StreamEvent>) {
        if let Some(error) = chunk.get("error") {
            let message = error["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            events.push(StreamEvent::Error { message });
            return;
        }

        if let Some(choice) = chunk["choices"].get(0) {
            let delta = &choice["delta"];
            let reasoning = delta["reasoning"].as_str().or_else(|| delta["reasoning_content"].as_str());
            push_text(events, reasoning, true);
            push_text(events, delta["content"].as_str(), false);
            if let Some(calls) = delta["tool_calls"].as_array() {
                for call in calls {
                    self.tool_call_delta(call, events);
                }
            }
            if let Some(reason) = choice["finish_reason"].as_str() {
                self.finish_reason = Some(finish_reason(reason));
                self.close_tool_calls(events);
            }
        }

        if chunk["usage"].is_object() {
            self.record_usage(&chunk["usage"]);
        }
    }

    fn tool_call_delta(&mut self, call: &Value, events: &mut Vec<StreamEvent>) {
        let index = call["index"].as_u64().unwrap_or(0);
        let function = &call["function"];
        let id = match self.tool_calls.get(&index) {
            Some(id) => id.clone(),
            None => {
                let id = call["id"]
                    .as_str()
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| format!("call_{index}"));
                let name = function["name"].as_str().unwrap_or_default().to_string();
                self.tool_calls.insert(index, id.clone());
                events.push(StreamEvent::ToolCallStart { id: id.clone(), name });
                id
            }
        };
        if let Some(arguments) = function["arguments"].as_str().filter(|a| !a.is_empty()) {
            events.push(StreamEvent::ToolCallDelta {
                id,
                arguments_delta: arguments.to_string(),
            });
        }
    }

    fn close_tool_calls(&mut self, events: &mut Vec<StreamEvent>) {
        for id in std::mem::take(&mut self.tool_calls).into_values() {
            events.push(StreamEvent::ToolCallEnd { id });
        }
    }

    fn end(&mut self, events: &mut Vec<StreamEvent>) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.close_tool_calls(events);
        events.push(StreamEvent::MessageEnd {
            finish_reason: self.finish_reason.unwrap_or(FinishReason::Unknown),
            usage: self.usage,
            provider_metadata: self.provider_metadata(),
        });
    }

    fn record_usage(&mut self, usage: &Value) {
        if let Some(prompt) = usage["prompt_tokens"].as_u64() {
            self.usage.prompt_tokens = prompt;
        }
        if let Some(completion) = usage["completion_tokens"].as_u64() {
            self.usage.completion_tokens = completion;
        }
        let details = &usage["prompt_tokens_details"];
        if let Some(cached) = details["cached_tokens"].as_u64() {
            self.cached_tokens = Some(cached);
        }
        if let Some(caching) = details["caching_tokens"].as_u64() {
            self.caching_tokens = Some(caching);
        }
        if let Some(cost) = usage["cost"].as_f64() {
            self.cost = Some(cost);
        }
    }

    /// Metadata under the keys the usage normalizer of each flavor reads.
    fn provider_metadata(&self) -> Value {
        match self.flavor {
            OpenAiFlavor::OpenAi => match self.cached_tokens {
                Some(cached) => json!({ "openai": { "cachedPromptTokens": cached } }),
                None => Value::Null,
            },
            OpenAiFlavor::Gemini => match self.cached_tokens {
                Some(cached) => json!({ "google": { "cachedContentTokenCount": cached } }),
                None => Value::Null,
            },
            OpenAiFlavor::OpenRouter if self.cost.is_some() || self.cached_tokens.is_some() => json!({
                "openrouter": {
                    "usage": {
                        "cost": self.cost,
                        "promptTokensDetails": { "cachedTokens": self.cached_tokens },
                    }
                }
            }),
            OpenAiFlavor::Requesty if self.caching_tokens.is_some() || self.cached_tokens.is_some() => json!({
                "requesty": {
                    "usage": {
                        "cachingTokens": self.caching_tokens,
                        "cachedTokens": self.cached_tokens,
                    }
                }
            }),
            _ => Value::Null,
        }
    }
}

fn push_text(events: &mut Vec<StreamEvent>, text: Option<&str>, reasoning: bool) {
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return;
    };
    let text = text.to_string();
    events.push(if reasoning {
        StreamEvent::ReasoningDelta { text }
    } else {
        StreamEvent::TextDelta { text }
    });
}

pub(super) fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::Other,
        "error" => FinishReason::Error,
        _ => FinishReason::Unknown,
    }
}
