//! File reading tool with binary detection.

use async_trait::async_trait;
use desk_core::tools::{qualified, POWER_TOOL_FILE_READ, POWER_TOOL_GROUP_NAME};
use serde_json::Value;
use tracing::debug;

use super::{denied, is_binary, resolve};
use crate::approval::ApprovalDecision;
use crate::tool::{required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Read the full text content of a file.
pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: POWER_TOOL_FILE_READ.to_string(),
            description: "Reads and returns the content of a specified non-binary file. Useful for inspecting file contents when analyzing user's request or before modifying it.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "filePath": {
                        "type": "string",
                        "description": "The path to the file to be read (relative to the project root or absolute if outside of project directory)."
                    }
                },
                "required": ["filePath"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let file_path = required_str(&input, "filePath")?;
        ctx.notify_started(POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_READ, &input);

        let decision = ctx
            .approve(
                &qualified(POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_READ),
                &format!("Approve reading file '{file_path}'?"),
                None,
            )
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(&format!("File read of '{file_path}'"), reason),
            ));
        }

        let path = resolve(&ctx.working_directory, file_path);
        debug!(path = %path.display(), "reading file");

        let content = match tokio::fs::read(&path).await {
            Ok(bytes) if is_binary(&bytes) => "Error: Binary files cannot be read.".to_string(),
            Ok(bytes) => format!(
                "Here is the most recent content of '{file_path}' (ignore previous versions):\n\n{}",
                String::from_utf8_lossy(&bytes)
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                format!("Error: File '{file_path}' not found.")
            }
            Err(e) => format!("Error: Could not read file '{file_path}'. {e}"),
        };

        Ok(ToolResult::success(&ctx.call_id, content))
    }
}
