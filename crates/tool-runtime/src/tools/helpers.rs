//! Targets of repaired tool calls.
//!
//! When the model names a tool that does not exist, or passes arguments the
//! schema rejects, the call is rewritten to one of these tools. Their result
//! tells the model what went wrong so it can retry on the next step.

use async_trait::async_trait;
use desk_core::tools::{
    HELPERS_TOOL_GROUP_NAME, HELPERS_TOOL_INVALID_TOOL_ARGUMENTS, HELPERS_TOOL_NO_SUCH_TOOL,
};
use serde_json::Value;

use crate::tool::{optional_str, required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

pub struct NoSuchToolTool;

#[async_trait]
impl Tool for NoSuchToolTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: HELPERS_TOOL_NO_SUCH_TOOL.to_string(),
            description: "Internal helper tool to inform the agent that a tool with the given name does not exist.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "toolName": { "type": "string", "description": "Name of the tool that was requested." },
                    "availableTools": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Names of the tools that are available."
                    }
                },
                "required": ["toolName", "availableTools"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let tool_name = required_str(&input, "toolName")?;
        let available: Vec<&str> = input
            .get("availableTools")
            .and_then(|v| v.as_array())
            .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
            .unwrap_or_default();
        ctx.notify_started(HELPERS_TOOL_GROUP_NAME, HELPERS_TOOL_NO_SUCH_TOOL, &input);

        Ok(ToolResult::success(
            &ctx.call_id,
            format!(
                "Tool '{tool_name}' does not exist. Use one of the available tools: {}.",
                available.join(", ")
            ),
        ))
    }
}

pub struct InvalidToolArgumentsTool;

#[async_trait]
impl Tool for InvalidToolArgumentsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: HELPERS_TOOL_INVALID_TOOL_ARGUMENTS.to_string(),
            description: "Internal helper tool to inform the agent that a tool was called with invalid arguments.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "toolName": { "type": "string", "description": "Name of the tool that was called." },
                    "toolArgs": { "type": "string", "description": "The arguments as passed, serialized as JSON." },
                    "error": { "type": "string", "description": "Why the arguments were rejected." }
                },
                "required": ["toolName", "toolArgs", "error"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let tool_name = required_str(&input, "toolName")?;
        let tool_args = optional_str(&input, "toolArgs").unwrap_or("{}");
        let error = optional_str(&input, "error").unwrap_or("unknown error");
        ctx.notify_started(HELPERS_TOOL_GROUP_NAME, HELPERS_TOOL_INVALID_TOOL_ARGUMENTS, &input);

        Ok(ToolResult::success(
            &ctx.call_id,
            format!(
                "Tool '{tool_name}' was called with invalid arguments {tool_args}: {error}. Check the tool's input schema and call it again with corrected arguments."
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::test_context;

    #[tokio::test]
    async fn test_no_such_tool_lists_alternatives() {
        let out = NoSuchToolTool
            .execute(
                serde_json::json!({"toolName": "read", "availableTools": ["power---file_read", "power---glob"]}),
                &test_context("/tmp"),
            )
            .await
            .unwrap();
        assert_eq!(
            out.content,
            "Tool 'read' does not exist. Use one of the available tools: power---file_read, power---glob."
        );
    }

    #[tokio::test]
    async fn test_invalid_arguments_message() {
        let out = InvalidToolArgumentsTool
            .execute(
                serde_json::json!({
                    "toolName": "power---bash",
                    "toolArgs": "{\"cmd\":\"ls\"}",
                    "error": "missing required property 'command'"
                }),
                &test_context("/tmp"),
            )
            .await
            .unwrap();
        assert!(out.content.starts_with("Tool 'power---bash' was called with invalid arguments {\"cmd\":\"ls\"}: missing required property 'command'."));
    }
}
