//! SSE decoding and content-block state tracking for the Claude streaming API.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::trace;

use desk_tool_runtime::{FinishReason, StreamEvent, TokenUsage};

use crate::providers::stream::{LineBuffer, SseDecode};

/// What kind of content block sits at a given index.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Text,
    Thinking,
    ToolUse(String),
    Other,
}

/// Tracks per-block state so deltas and stops carrying only a block index
/// can be attributed to the right tool call.
#[derive(Debug, Default)]
pub(super) struct BlockTracker {
    blocks: HashMap<u64, Block>,
}

impl BlockTracker {
    fn register_block(&mut self, index: u64, block: Block) {
        self.blocks.insert(index, block);
    }

    fn tool_id(&self, index: u64) -> Option<&str> {
        match self.blocks.get(&index) {
            Some(Block::ToolUse(id)) => Some(id),
            _ => None,
        }
    }

    fn is_thinking(&self, index: u64) -> bool {
        matches!(self.blocks.get(&index), Some(Block::Thinking))
    }
}

/// Incremental decoder for one streamed message.
///
/// Bytes go in as they arrive from the network; complete [`StreamEvent`]s
/// come out. Usage is assembled from `message_start` and `message_delta`
/// and reported once, with the finish reason, on `message_stop`.
#[derive(Debug, Default)]
pub(super) struct SseDecoder {
    lines: LineBuffer,
    event_type: Option<String>,
    data: String,
    blocks: BlockTracker,
    usage: TokenUsage,
    cache_write_tokens: Option<u64>,
    cache_read_tokens: Option<u64>,
    finish_reason: Option<FinishReason>,
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
        self.dispatch(&mut events);
        events
    }
}

impl SseDecoder {
    pub(super) fn new() -> Self {
        Self::default()
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.is_empty() {
            self.dispatch(events);
        } else if let Some(value) = line.strip_prefix("event:") {
            self.event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comments (":") and unknown fields are ignored.
    }

    fn dispatch(&mut self, events: &mut Vec<StreamEvent>) {
        let event_type = self.event_type.take();
        if self.data.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.data);
        let parsed: Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(e) => {
                trace!(error = %e, "ignoring SSE event with invalid JSON");
                return;
            }
        };
        let kind = event_type
            .or_else(|| parsed["type"].as_str().map(String::from))
            .unwrap_or_default();
        self.handle(&kind, &parsed, events);
    }

    fn handle(&mut self, kind: &str, data: &Value, events: &mut Vec<StreamEvent>) {
        match kind {
            "message_start" => self.record_usage(&data["message"]["usage"]),
            "content_block_start" => {
                let index = data["index"].as_u64().unwrap_or(0);
                let block = &data["content_block"];
                match block["type"].as_str() {
                    Some("text") => {
                        self.blocks.register_block(index, Block::Text);
                        push_text(events, block["text"].as_str(), false);
                    }
                    Some("thinking") => {
                        self.blocks.register_block(index, Block::Thinking);
                        push_text(events, block["thinking"].as_str(), true);
                    }
                    Some("tool_use") => {
                        let id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        self.blocks.register_block(index, Block::ToolUse(id.clone()));
                        events.push(StreamEvent::ToolCallStart { id, name });
                    }
                    _ => self.blocks.register_block(index, Block::Other),
                }
            }
            "content_block_delta" => {
                let index = data["index"].as_u64().unwrap_or(0);
                let delta = &data["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => push_text(events, delta["text"].as_str(), false),
                    Some("thinking_delta") if self.blocks.is_thinking(index) => {
                        push_text(events, delta["thinking"].as_str(), true)
                    }
                    Some("input_json_delta") => {
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        match self.blocks.tool_id(index) {
                            Some(id) if !partial.is_empty() => events.push(StreamEvent::ToolCallDelta {
                                id: id.to_string(),
                                arguments_delta: partial.to_string(),
                            }),
                            Some(_) => {}
                            None => trace!(index, "input delta for unknown block"),
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                let index = data["index"].as_u64().unwrap_or(0);
                if let Some(id) = self.blocks.tool_id(index) {
                    events.push(StreamEvent::ToolCallEnd { id: id.to_string() });
                }
            }
            "message_delta" => {
                if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                    self.finish_reason = Some(finish_reason(reason));
                }
                self.record_usage(&data["usage"]);
            }
            "message_stop" => events.push(StreamEvent::MessageEnd {
                finish_reason: self.finish_reason.unwrap_or(FinishReason::Unknown),
                usage: self.usage,
                provider_metadata: self.provider_metadata(),
            }),
            "error" => {
                let message = data["error"]["message"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| data.to_string());
                events.push(StreamEvent::Error { message });
            }
            other => trace!(event_type = other, "ignoring SSE event"),
        }
    }

    /// Counters are cumulative; later events overwrite what they carry.
    fn record_usage(&mut self, usage: &Value) {
        if let Some(input) = usage["input_tokens"].as_u64() {
            self.usage.prompt_tokens = input;
        }
        if let Some(output) = usage["output_tokens"].as_u64() {
            self.usage.completion_tokens = output;
        }
        if let Some(write) = usage["cache_creation_input_tokens"].as_u64() {
            self.cache_write_tokens = Some(write);
        }
        if let Some(read) = usage["cache_read_input_tokens"].as_u64() {
            self.cache_read_tokens = Some(read);
        }
    }

    fn provider_metadata(&self) -> Value {
        if self.cache_write_tokens.is_none() && self.cache_read_tokens.is_none() {
            return Value::Null;
        }
        json!({
            "anthropic": {
                "cacheCreationInputTokens": self.cache_write_tokens,
                "cacheReadInputTokens": self.cache_read_tokens,
            }
        })
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

pub(super) fn finish_reason(stop_reason: &str) -> FinishReason {
    match stop_reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        "refusal" | "pause_turn" => FinishReason::Other,
        _ => FinishReason::Unknown,
    }
}
