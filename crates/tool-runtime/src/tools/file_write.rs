//! File writing tool with parent directory creation.

use async_trait::async_trait;
use desk_core::tools::{qualified, POWER_TOOL_FILE_WRITE, POWER_TOOL_GROUP_NAME};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{denied, resolve};
use crate::approval::ApprovalDecision;
use crate::tool::{required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileWriteMode {
    #[default]
    Overwrite,
    Append,
    CreateOnly,
}

/// Write, append to or create files.
pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: POWER_TOOL_FILE_WRITE.to_string(),
            description: "Writes content to a specified file. Can create a new file, overwrite an existing file, or append to an existing file.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "filePath": {
                        "type": "string",
                        "description": "The path to the file to be written (relative to the project root)."
                    },
                    "content": {
                        "type": "string",
                        "description": "The content to write to the file. Do not use escape characters \\ in the string like \\n or \\\" and others."
                    },
                    "mode": {
                        "type": "string",
                        "enum": ["overwrite", "append", "create_only"],
                        "description": "Mode of writing: 'overwrite' (overwrites or creates), 'append' (appends or creates), 'create_only' (creates if not exists, fails if exists). Default: 'overwrite'."
                    }
                },
                "required": ["filePath", "content"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let file_path = required_str(&input, "filePath")?;
        let content = required_str(&input, "content")?;
        let mode: FileWriteMode = match input.get("mode") {
            Some(Value::Null) | None => FileWriteMode::default(),
            Some(mode) => serde_json::from_value(mode.clone())
                .map_err(|e| ToolError::InvalidInput(format!("invalid 'mode': {e}")))?,
        };
        ctx.notify_started(POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_WRITE, &input);

        let question = match mode {
            FileWriteMode::Overwrite => format!("Approve overwriting or creating file '{file_path}'?"),
            FileWriteMode::Append => format!("Approve appending to file '{file_path}'?"),
            FileWriteMode::CreateOnly => format!("Approve creating file '{file_path}'?"),
        };
        let key = qualified(POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_WRITE);
        if let ApprovalDecision::Denied(reason) = ctx.approve(&key, &question, None).await {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(&format!("File write to '{file_path}'"), reason),
            ));
        }

        let path = resolve(&ctx.working_directory, file_path);
        debug!(path = %path.display(), ?mode, bytes = content.len(), "writing file");

        let outcome = write(&path, content, mode).await;
        let message = match outcome {
            Ok(WriteOutcome::Created) => format!("Successfully wrote to '{file_path}' (created)."),
            Ok(WriteOutcome::Exists) => {
                format!("Error: File '{file_path}' already exists (mode: create_only).")
            }
            Ok(WriteOutcome::Appended) => format!("Successfully appended to '{file_path}'."),
            Ok(WriteOutcome::Written) => {
                format!("Successfully wrote to '{file_path}' (overwritten/created).")
            }
            Err(e) => format!("Error writing to file '{file_path}': {e}"),
        };

        Ok(ToolResult::success(&ctx.call_id, message))
    }
}

enum WriteOutcome {
    Created,
    Exists,
    Appended,
    Written,
}

async fn write(
    path: &std::path::Path,
    content: &str,
    mode: FileWriteMode,
) -> std::io::Result<WriteOutcome> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match mode {
        FileWriteMode::CreateOnly => {
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await;
            match file {
                Ok(mut file) => {
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                    Ok(WriteOutcome::Created)
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(WriteOutcome::Exists),
                Err(e) => Err(e),
            }
        }
        FileWriteMode::Append => {
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok(WriteOutcome::Appended)
        }
        FileWriteMode::Overwrite => {
            tokio::fs::write(path, content).await?;
            Ok(WriteOutcome::Written)
        }
    }
}
