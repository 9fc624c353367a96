use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tools::*;

/// Persisted approval policy for a single tool id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolApprovalState {
    /// Execute without asking.
    Always,
    /// Never offer the tool to the model.
    Never,
    /// Ask the user before each execution.
    Ask,
}

/// Per-token prices used for usage cost reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    pub cache_write_input_token_cost: Option<f64>,
    pub cache_read_input_token_cost: Option<f64>,
}

/// A named bundle of model choice, limits and tool policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub max_iterations: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Minimum gap between two external tool calls, in milliseconds.
    pub min_time_between_tool_calls: u64,
    pub enabled_servers: Vec<String>,
    /// Keyed by canonical tool id (`group---tool`).
    pub tool_approvals: BTreeMap<String, ToolApprovalState>,
    pub include_context_files: bool,
    pub include_repo_map: bool,
    pub use_power_tools: bool,
    pub use_aider_tools: bool,
    pub use_todo_tools: bool,
    /// Offer `subagents---run_task` when subagents are configured.
    pub use_subagents: bool,
    pub custom_instructions: String,
    pub auto_approve: bool,
    pub pricing: Option<ModelPricing>,
}

impl AgentProfile {
    pub fn default_tool_approvals() -> BTreeMap<String, ToolApprovalState> {
        use ToolApprovalState::{Always, Ask};
        [
            (AIDER_TOOL_GROUP_NAME, AIDER_TOOL_GET_CONTEXT_FILES, Always),
            (AIDER_TOOL_GROUP_NAME, AIDER_TOOL_ADD_CONTEXT_FILES, Always),
            (AIDER_TOOL_GROUP_NAME, AIDER_TOOL_DROP_CONTEXT_FILES, Always),
            (AIDER_TOOL_GROUP_NAME, AIDER_TOOL_RUN_PROMPT, Ask),
            (POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_EDIT, Ask),
            (POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_READ, Always),
            (POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_WRITE, Ask),
            (POWER_TOOL_GROUP_NAME, POWER_TOOL_GLOB, Always),
            (POWER_TOOL_GROUP_NAME, POWER_TOOL_GREP, Always),
            (POWER_TOOL_GROUP_NAME, POWER_TOOL_BASH, Ask),
            (POWER_TOOL_GROUP_NAME, POWER_TOOL_FETCH, Always),
            (SUBAGENTS_TOOL_GROUP_NAME, SUBAGENTS_TOOL_RUN_TASK, Always),
        ]
        .into_iter()
        .map(|(group, tool, state)| (qualified(group, tool), state))
        .collect()
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: "Power Tools".to_string(),
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_iterations: 100,
            max_tokens: 8192,
            temperature: 0.1,
            min_time_between_tool_calls: 0,
            enabled_servers: Vec::new(),
            tool_approvals: Self::default_tool_approvals(),
            include_context_files: true,
            include_repo_map: false,
            use_power_tools: true,
            use_aider_tools: false,
            use_todo_tools: true,
            use_subagents: true,
            custom_instructions: String::new(),
            auto_approve: false,
            pricing: None,
        }
    }
}

/// When the main agent is expected to delegate to a subagent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// Delegate whenever a task matches the subagent's description.
    Automatic,
    /// Delegate only when the user asks for the subagent.
    #[default]
    OnDemand,
}

/// A profile the main agent can hand self-contained tasks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub invocation_mode: InvocationMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Limits and tool policy of the nested run.
    #[serde(default)]
    pub profile: AgentProfile,
}

fn default_enabled() -> bool {
    true
}

impl SubagentConfig {
    /// Disabled subagents and those without a system prompt are never offered.
    pub fn is_available(&self) -> bool {
        self.enabled && !self.system_prompt.trim().is_empty()
    }
}

/// Launch configuration of one external tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl McpServerConfig {
    /// Stable serialized form used to detect config changes between reconciliations.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
