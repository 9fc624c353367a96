use crate::tool::{ToolCall, ToolResult};
use crate::usage::UsageReport;
use serde::{Deserialize, Serialize};

/// A message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConversationMessage {
    /// Instructions injected outside the system prompt
    System(String),
    /// User's text input
    User(String),
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantContent),
    /// Result of a tool execution
    ToolResult(ToolResult),
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        ConversationMessage::User(text.into())
    }

    /// Plain assistant text with no tool calls.
    pub fn assistant(text: impl Into<String>) -> Self {
        ConversationMessage::Assistant(AssistantContent {
            text: Some(text.into()),
            ..Default::default()
        })
    }
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantContent {
    /// Text blocks in the response
    pub text: Option<String>,
    /// Reasoning emitted before the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool calls requested by the assistant
    pub tool_calls: Vec<ToolCall>,
    /// Set only on steps that produced no tool results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageReport>,
}

/// The conversation carried between prompts of a session.
///
/// History is kept whole; every run replays it after the context messages.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the messages produced by one agent run.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = ConversationMessage>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
