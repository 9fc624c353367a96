//! Shell command execution tool.
//!
//! Runs commands via `sh -c` in the project root or a sub-directory. The
//! result is always structured as `{stdout, stderr, exitCode}`.

use async_trait::async_trait;
use desk_core::tools::{qualified, POWER_TOOL_BASH, POWER_TOOL_GROUP_NAME};
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{denied, resolve};
use crate::approval::ApprovalDecision;
use crate::tool::{
    optional_str, optional_u64, required_str, Tool, ToolContext, ToolDefinition, ToolError,
    ToolResult,
};

/// Execute shell commands with timeout and working directory support.
pub struct BashTool;

impl BashTool {
    const DEFAULT_TIMEOUT_MS: u64 = 60_000;
}

#[async_trait]
impl Tool for BashTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: POWER_TOOL_BASH.to_string(),
            description: "Executes a shell command. For safety, commands may be sandboxed or require user approval (approval handled by Agent).".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute (e.g., ls -la, npm install)."
                    },
                    "cwd": {
                        "type": "string",
                        "description": "The working directory for the command (relative to project root). Default: project root."
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Timeout for the command execution in milliseconds. Default: 60000 ms."
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let command = required_str(&input, "command")?;
        let cwd = optional_str(&input, "cwd");
        let timeout_ms = optional_u64(&input, "timeout").unwrap_or(Self::DEFAULT_TIMEOUT_MS);
        ctx.notify_started(POWER_TOOL_GROUP_NAME, POWER_TOOL_BASH, &input);

        let key = qualified(POWER_TOOL_GROUP_NAME, POWER_TOOL_BASH);
        let subject = format!(
            "Command: {command}\nWorking Directory: {}\nTimeout: {timeout_ms}ms",
            cwd.unwrap_or(".")
        );
        let decision = ctx
            .approve(&key, "Approve executing bash command?", Some(&subject))
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied("Bash command execution", reason),
            ));
        }

        let working_dir = cwd.map_or_else(
            || ctx.working_directory.clone(),
            |cwd| resolve(&ctx.working_directory, cwd),
        );
        debug!(command, timeout_ms, working_dir = %working_dir.display(), "executing bash command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return Ok(outcome(&ctx.call_id, "", &e.to_string(), 1)),
        };

        let timeout = Duration::from_millis(timeout_ms);
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Ok(outcome(&ctx.call_id, "", "Command cancelled", 1));
            }
            result = tokio::time::timeout(timeout, child.wait_with_output()) => result,
        };

        let result = match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code().unwrap_or(1);
                if exit_code != 0 {
                    debug!(exit_code, "command returned non-zero exit code");
                }
                outcome(&ctx.call_id, &stdout, &stderr, exit_code)
            }
            Ok(Err(e)) => outcome(&ctx.call_id, "", &e.to_string(), 1),
            Err(_) => {
                warn!(command, timeout_ms, "command timed out");
                outcome(
                    &ctx.call_id,
                    "",
                    &format!("Command timed out after {timeout_ms}ms"),
                    1,
                )
            }
        };
        Ok(result)
    }
}

fn outcome(call_id: &str, stdout: &str, stderr: &str, exit_code: i32) -> ToolResult {
    ToolResult::json(
        call_id,
        &serde_json::json!({
            "stdout": stdout,
            "stderr": stderr,
            "exitCode": exit_code,
        }),
    )
}
