//! Claude (Anthropic API) implementation of [`ToolAwareLlmProvider`].
//!
//! Streams the Messages API over SSE and translates between its block
//! format and the provider-agnostic [`StreamEvent`] / [`ConversationMessage`]
//! types, including reasoning blocks, token usage with cache counters, and
//! ephemeral cache breakpoints.
//!
//! [`ToolAwareLlmProvider`]: desk_tool_runtime::ToolAwareLlmProvider
//! [`StreamEvent`]: desk_tool_runtime::StreamEvent
//! [`ConversationMessage`]: desk_tool_runtime::ConversationMessage

mod sse;
mod streaming;
mod translate;

pub use self::streaming::{ClaudeToolProvider, ANTHROPIC_API_URL, DEFAULT_CLAUDE_MODEL};

#[cfg(test)]
mod tests;
