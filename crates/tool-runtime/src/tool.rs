use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalDecision, ApprovalGate};
use crate::events::{AgentEvent, EventSink};

/// Describes a tool's interface for LLM consumption.
/// Maps to Claude's tool format and OpenAI's function format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name. Bare (`file_read`) on a tool, namespaced once registered.
    pub name: String,
    /// Human-readable description for the LLM
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// Represents an LLM requesting execution of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this invocation (used to match results)
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// JSON input arguments
    pub input: Value,
}

/// Result of executing a tool, sent back to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCall id
    pub tool_call_id: String,
    /// Result content (text or serialized JSON)
    pub content: String,
    /// Whether this result represents an error
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }

    /// Structured payload serialized as the result text.
    pub fn json(call_id: impl Into<String>, value: &Value) -> Self {
        Self::success(call_id, value.to_string())
    }
}

/// Per-call execution context handed to every tool.
#[derive(Clone)]
pub struct ToolContext {
    /// Project root for file/bash operations
    pub working_directory: PathBuf,
    /// Id of the call being executed
    pub call_id: String,
    pub approval: Arc<ApprovalGate>,
    pub events: EventSink,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn for_call(&self, call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            ..self.clone()
        }
    }

    /// Announce the call before any approval or work happens.
    pub fn notify_started(&self, group: &str, tool: &str, args: &Value) {
        self.events.emit(AgentEvent::ToolCallStarted {
            call_id: self.call_id.clone(),
            group: group.to_string(),
            tool: tool.to_string(),
            args: args.clone(),
        });
    }

    pub async fn approve(&self, key: &str, text: &str, subject: Option<&str>) -> ApprovalDecision {
        self.approval.decide(key, text, subject).await
    }
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async. Executors report failures
/// as error results; an `Err` is reserved for contract violations such as
/// arguments that do not match the schema.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, JSON Schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Read a required string argument.
pub fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput(format!("missing '{key}' field")))
}

pub fn optional_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

pub fn optional_bool(input: &Value, key: &str) -> Option<bool> {
    input.get(key).and_then(|v| v.as_bool())
}

pub fn optional_u64(input: &Value, key: &str) -> Option<u64> {
    input.get(key).and_then(|v| v.as_u64())
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use crate::approval::{InMemoryApprovalStore, PromptSurface};
    use crate::approval::scripted::ScriptedPrompt;

    /// Context whose gate approves everything.
    pub fn test_context(dir: impl Into<PathBuf>) -> ToolContext {
        context_with(dir, true, Arc::new(ScriptedPrompt::default()))
    }

    /// Context that asks `prompt` for every tool marked `Ask`.
    pub fn context_with(
        dir: impl Into<PathBuf>,
        auto_approve: bool,
        prompt: Arc<dyn PromptSurface>,
    ) -> ToolContext {
        context_asking(dir, &[], auto_approve, prompt)
    }

    /// Like [`context_with`], with `ask` keys forced to `Ask`.
    pub fn context_asking(
        dir: impl Into<PathBuf>,
        ask: &[&str],
        auto_approve: bool,
        prompt: Arc<dyn PromptSurface>,
    ) -> ToolContext {
        let cancel = CancellationToken::new();
        let mut states = desk_core::AgentProfile::default_tool_approvals();
        for key in ask {
            states.insert(key.to_string(), desk_core::ToolApprovalState::Ask);
        }
        let store = Arc::new(InMemoryApprovalStore::new(states));
        ToolContext {
            working_directory: dir.into(),
            call_id: "call_test".to_string(),
            approval: Arc::new(ApprovalGate::new(auto_approve, store, prompt, cancel.clone())),
            events: EventSink::disconnected(),
            cancel,
        }
    }
}
