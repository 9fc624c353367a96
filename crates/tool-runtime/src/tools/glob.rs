use async_trait::async_trait;
use desk_core::tools::{qualified, POWER_TOOL_GLOB, POWER_TOOL_GROUP_NAME};
use serde_json::Value;

use super::walk::glob_paths;
use super::{denied, resolve};
use crate::approval::ApprovalDecision;
use crate::tool::{optional_str, required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Find files and directories by glob pattern.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: POWER_TOOL_GLOB.to_string(),
            description: "Finds files and directories matching a specified glob pattern within the project. Useful for discovering files based on patterns.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "The glob pattern to search for (e.g., src/**/*.ts, *.md)."
                    },
                    "cwd": {
                        "type": "string",
                        "description": "The current working directory from which to apply the glob pattern (relative to project root). Default: project root."
                    },
                    "ignore": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "An array of glob patterns to ignore."
                    }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let pattern = required_str(&input, "pattern")?.to_string();
        let cwd = optional_str(&input, "cwd");
        let ignore: Vec<String> = input
            .get("ignore")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        ctx.notify_started(POWER_TOOL_GROUP_NAME, POWER_TOOL_GLOB, &input);

        let key = qualified(POWER_TOOL_GROUP_NAME, POWER_TOOL_GLOB);
        let question = format!("Approve glob search with pattern '{pattern}'?");
        if let ApprovalDecision::Denied(reason) = ctx.approve(&key, &question, None).await {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(&format!("Glob search with pattern '{pattern}'"), reason),
            ));
        }

        let base = ctx.working_directory.clone();
        let root = cwd.map_or_else(|| base.clone(), |cwd| resolve(&base, cwd));
        let search = {
            let pattern = pattern.clone();
            tokio::task::spawn_blocking(move || glob_paths(&root, &pattern, &ignore, true))
        };

        let paths = match search.await {
            Ok(Ok(paths)) => paths,
            Ok(Err(e)) => {
                return Ok(ToolResult::success(
                    &ctx.call_id,
                    format!("Error executing glob pattern '{pattern}': {e}"),
                ));
            }
            Err(e) => return Err(ToolError::ExecutionFailed(e.to_string())),
        };

        let relative: Vec<String> = paths
            .iter()
            .map(|p| {
                p.strip_prefix(&base)
                    .unwrap_or(p)
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();

        Ok(ToolResult::json(&ctx.call_id, &serde_json::json!(relative)))
    }
}
