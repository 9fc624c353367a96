pub mod approval;
pub mod context;
pub mod conversation;
pub mod events;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod repair;
pub mod runtime;
pub mod schema;
pub mod stream;
pub mod throttle;
pub mod tool;
pub mod tool_id;
pub mod tools;
pub mod usage;

pub use approval::{
    ApprovalDecision, ApprovalGate, ApprovalQuestion, ApprovalStore, InMemoryApprovalStore,
    PromptAnswer, PromptSurface,
};
pub use conversation::{AssistantContent, Conversation, ConversationMessage};
pub use events::{AgentEvent, CompletedOrder, EventEnvelope, EventSink, LogLevel};
pub use provider::{CacheHint, LlmError, ToolAwareLlmProvider, TurnRequest};
pub use registry::{ToolGroup, ToolRegistry, ToolSource};
pub use runtime::{AgenticLoop, ExternalTool, ExternalTools, RunRequest};
pub use stream::{FinishReason, StreamEvent};
pub use throttle::CallThrottle;
pub use tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolError, ToolResult};
pub use tool_id::ToolId;
pub use tools::{ContextFile, PairProgrammer, PairResponse};
pub use usage::{TokenUsage, UsageReport};
