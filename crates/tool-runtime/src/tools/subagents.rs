//! Delegation of self-contained tasks to subagents.
//!
//! A subagent is a nested agent run with its own system prompt and profile.
//! It starts from an empty conversation; the task prompt is all it sees.

use async_trait::async_trait;
use desk_core::tools::{qualified, SUBAGENTS_TOOL_GROUP_NAME, SUBAGENTS_TOOL_RUN_TASK};
use desk_core::{InvocationMode, SubagentConfig};
use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{error, info};

use super::denied;
use crate::approval::ApprovalDecision;
use crate::conversation::ConversationMessage;
use crate::tool::{required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Runs a subagent to completion.
#[async_trait]
pub trait SubagentRunner: Send + Sync {
    /// Messages the nested run added, starting with its prompt.
    async fn run_subagent(
        &self,
        subagent: &SubagentConfig,
        prompt: &str,
        ctx: &ToolContext,
    ) -> anyhow::Result<Vec<ConversationMessage>>;
}

pub struct RunTaskTool {
    subagents: Vec<SubagentConfig>,
    runner: Arc<dyn SubagentRunner>,
}

impl RunTaskTool {
    /// Only available subagents are kept.
    pub fn new(subagents: Vec<SubagentConfig>, runner: Arc<dyn SubagentRunner>) -> Self {
        Self {
            subagents: subagents.into_iter().filter(|s| s.is_available()).collect(),
            runner,
        }
    }

    fn description(&self) -> String {
        let mut description =
            "Delegates a specific task to a subagent. You have access to the following subagents:\n".to_string();

        let automatic: Vec<_> = self
            .subagents
            .iter()
            .filter(|s| s.invocation_mode == InvocationMode::Automatic)
            .collect();
        if !automatic.is_empty() {
            description.push_str("\n<automatic-subagents>\n");
            for subagent in automatic {
                let _ = write!(
                    description,
                    "  <subagent>\n    <id>{}</id>\n    <name>{}</name>\n    <description>{}</description>\n  </subagent>\n",
                    subagent.id, subagent.name, subagent.description
                );
            }
            description.push_str("</automatic-subagents>\n");
        }

        let on_demand: Vec<_> = self
            .subagents
            .iter()
            .filter(|s| s.invocation_mode == InvocationMode::OnDemand)
            .collect();
        if !on_demand.is_empty() {
            description.push_str("\n<on-demand-subagents>\n");
            for subagent in on_demand {
                let _ = write!(
                    description,
                    "  <subagent>\n    <id>{}</id>\n    <name>{}</name>\n  </subagent>\n",
                    subagent.id, subagent.name
                );
            }
            description.push_str("</on-demand-subagents>\n");
        }

        description.push_str("\nWhen user asks to use subagent by name, find the most fitting one by the name. The subagent is responsible for its own deep context gathering if needed, you are expected to only provide `prompt`.");
        description
    }
}

#[async_trait]
impl Tool for RunTaskTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: SUBAGENTS_TOOL_RUN_TASK.to_string(),
            description: self.description(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "subagentId": {
                        "type": "string",
                        "description": "The ID of the specific subagent to use."
                    },
                    "prompt": {
                        "type": "string",
                        "description": "A clear and concise natural language prompt describing the task the subagent needs to perform. This prompt should provide all necessary information for the subagent to complete its task independently within its limited context."
                    }
                },
                "required": ["subagentId", "prompt"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let subagent_id = required_str(&input, "subagentId")?;
        let prompt = required_str(&input, "prompt")?;

        let Some(subagent) = self.subagents.iter().find(|s| s.id == subagent_id) else {
            return Ok(ToolResult::success(
                &ctx.call_id,
                format!("Error: Subagent with ID '{subagent_id}' not found or not enabled."),
            ));
        };
        ctx.notify_started(SUBAGENTS_TOOL_GROUP_NAME, SUBAGENTS_TOOL_RUN_TASK, &input);

        let decision = ctx
            .approve(
                &qualified(SUBAGENTS_TOOL_GROUP_NAME, SUBAGENTS_TOOL_RUN_TASK),
                &format!("Approve running subagent '{}'?", subagent.name),
                Some(prompt),
            )
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(&format!("Running subagent '{}'", subagent.name), reason),
            ));
        }

        info!(subagent = %subagent.name, "Running subagent");
        match self.runner.run_subagent(subagent, prompt, ctx).await {
            Ok(messages) => {
                let value = serde_json::json!({ "messages": messages });
                Ok(ToolResult::json(&ctx.call_id, &value))
            }
            Err(e) => {
                error!(subagent = %subagent.name, error = %e, "Error running subagent");
                Ok(ToolResult::error(
                    &ctx.call_id,
                    format!("Error running subagent '{}': {e}", subagent.name),
                ))
            }
        }
    }
}
