//! Delegation to a pair-programming collaborator.
//!
//! The collaborator owns its own file context and applies code changes
//! itself. These tools let the agent inspect and shape that context and hand
//! over natural-language coding tasks.

use async_trait::async_trait;
use desk_core::tools::{
    qualified, AIDER_TOOL_ADD_CONTEXT_FILES, AIDER_TOOL_DROP_CONTEXT_FILES,
    AIDER_TOOL_GET_CONTEXT_FILES, AIDER_TOOL_GROUP_NAME, AIDER_TOOL_RUN_PROMPT,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::{denied, resolve};
use crate::approval::ApprovalDecision;
use crate::events::LogLevel;
use crate::tool::{optional_bool, required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Approval key of the follow-up question asked before creating a missing file.
pub const CREATE_FILE_QUESTION_KEY: &str = "tool_aider_add_context_file_create_file";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFile {
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// One reply of the collaborator to a delegated prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairResponse {
    pub message_id: String,
    pub content: String,
    pub edited_files: Vec<String>,
}

/// The collaborator behind the `aider` tool group.
#[async_trait]
pub trait PairProgrammer: Send + Sync {
    async fn context_files(&self) -> Vec<ContextFile>;

    /// Returns false when the file was already in the context.
    async fn add_file(&self, file: ContextFile) -> bool;

    async fn drop_file(&self, path: &str);

    async fn run_prompt(&self, prompt: &str) -> anyhow::Result<Vec<PairResponse>>;
}

fn key(tool: &str) -> String {
    qualified(AIDER_TOOL_GROUP_NAME, tool)
}

pub struct GetContextFilesTool {
    pair: Arc<dyn PairProgrammer>,
}

impl GetContextFilesTool {
    pub fn new(pair: Arc<dyn PairProgrammer>) -> Self {
        Self { pair }
    }
}

#[async_trait]
impl Tool for GetContextFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: AIDER_TOOL_GET_CONTEXT_FILES.to_string(),
            description: "Get all files currently in the context for Aider to read or edit".to_string(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        ctx.notify_started(AIDER_TOOL_GROUP_NAME, AIDER_TOOL_GET_CONTEXT_FILES, &input);

        let decision = ctx
            .approve(&key(AIDER_TOOL_GET_CONTEXT_FILES), "Approve getting context files?", None)
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::success(&ctx.call_id, denied("Getting context files", reason)));
        }

        let files = self.pair.context_files().await;
        let value = serde_json::to_value(files).map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolResult::json(&ctx.call_id, &value))
    }
}

pub struct AddContextFilesTool {
    pair: Arc<dyn PairProgrammer>,
}

impl AddContextFilesTool {
    pub fn new(pair: Arc<dyn PairProgrammer>) -> Self {
        Self { pair }
    }
}

#[async_trait]
impl Tool for AddContextFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: AIDER_TOOL_ADD_CONTEXT_FILES.to_string(),
            description: "Adds file(s) to the Aider context for reading or editing.\nPrerequisite: Before using, check the current context with 'get_context_files'. Do NOT add files already present in the context.\nUse relative file path(s) for files intended for editing within the project. Use absolute file path(s) for read-only files (e.g., outside the project).".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path to add to context. Relative to project directory when not read-only. Absolute path should be used when read-only."
                    },
                    "readOnly": {
                        "type": "boolean",
                        "description": "Whether the file is read-only"
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = required_str(&input, "path")?;
        let read_only = optional_bool(&input, "readOnly").unwrap_or(false);
        ctx.notify_started(AIDER_TOOL_GROUP_NAME, AIDER_TOOL_ADD_CONTEXT_FILES, &input);

        let question = format!("Approve adding file '{path}' to context?");
        if let ApprovalDecision::Denied(reason) =
            ctx.approve(&key(AIDER_TOOL_ADD_CONTEXT_FILES), &question, None).await
        {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(&format!("Adding file '{path}' to context"), reason),
            ));
        }

        let absolute = resolve(&ctx.working_directory, path);
        if !tokio::fs::try_exists(&absolute).await.unwrap_or(false) {
            let question = format!("File '{path}' does not exist. Create it?");
            if !ctx.approve(CREATE_FILE_QUESTION_KEY, &question, None).await.is_approved() {
                return Ok(ToolResult::success(
                    &ctx.call_id,
                    format!("File '{path}' not created by user. It was not added to the context."),
                ));
            }

            let created = async {
                if let Some(parent) = absolute.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&absolute, "").await
            };
            if let Err(e) = created.await {
                warn!(path, error = %e, "failed to create file");
                ctx.events
                    .log(LogLevel::Error, format!("Failed to create file '{path}': {e}"));
                return Ok(ToolResult::success(
                    &ctx.call_id,
                    format!("Error: Failed to create file '{path}'. It was not added to the context."),
                ));
            }
            info!(path, "created new file");
            ctx.events.log(LogLevel::Info, format!("Created new file: {path}"));
        }

        let added = self
            .pair
            .add_file(ContextFile {
                path: path.to_string(),
                read_only,
            })
            .await;
        let message = if added {
            format!("Added file: {path}")
        } else {
            format!("Not added - file '{path}' was already in the context.")
        };
        Ok(ToolResult::success(&ctx.call_id, message))
    }
}

pub struct DropContextFilesTool {
    pair: Arc<dyn PairProgrammer>,
}

impl DropContextFilesTool {
    pub fn new(pair: Arc<dyn PairProgrammer>) -> Self {
        Self { pair }
    }
}

#[async_trait]
impl Tool for DropContextFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: AIDER_TOOL_DROP_CONTEXT_FILES.to_string(),
            description: "Removes file(s) from the Aider context.\nNote: Unless explicitly requested by the user to remove specific file(s), this tool should primarily be used to remove files that were previously added using 'add_context_files' (e.g., after a related 'run_prompt' task is completed).".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path to remove from context." }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = required_str(&input, "path")?;
        ctx.notify_started(AIDER_TOOL_GROUP_NAME, AIDER_TOOL_DROP_CONTEXT_FILES, &input);

        let question = format!("Approve dropping file '{path}' from context?");
        if let ApprovalDecision::Denied(reason) =
            ctx.approve(&key(AIDER_TOOL_DROP_CONTEXT_FILES), &question, None).await
        {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(&format!("Dropping file '{path}' from context"), reason),
            ));
        }

        self.pair.drop_file(path).await;
        Ok(ToolResult::success(&ctx.call_id, format!("Dropped file: {path}")))
    }
}

pub struct RunPromptTool {
    pair: Arc<dyn PairProgrammer>,
}

impl RunPromptTool {
    pub fn new(pair: Arc<dyn PairProgrammer>) -> Self {
        Self { pair }
    }
}

const RUN_PROMPT_DESCRIPTION: &str = "Delegates a natural language coding task to the Aider assistant for execution within the current project context.
Use this tool for:
- Writing new code.
- Modifying or refactoring existing code.
- Explaining code segments.
- Debugging code.
- Implementing new features.
- This tools must be preferred (if not specified by user otherwise) over other tools creating or modifying files, as it is more efficient and effective.

Prerequisites
- All relevant existing project files for the task MUST be added to the Aider context using 'add_context_files' BEFORE calling this tool.

Input:
- A clear, complete, and standalone natural language prompt describing the coding task.

Restrictions:
- Prompts MUST be language-agnostic. Do NOT mention specific programming languages (e.g., Python, JavaScript), libraries, or syntax elements.
- Treat Aider as a capable programmer; provide sufficient detail but avoid excessive handholding.
";

#[async_trait]
impl Tool for RunPromptTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: AIDER_TOOL_RUN_PROMPT.to_string(),
            description: RUN_PROMPT_DESCRIPTION.to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "The prompt to run in natural language." }
                },
                "required": ["prompt"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let prompt = required_str(&input, "prompt")?;
        ctx.notify_started(AIDER_TOOL_GROUP_NAME, AIDER_TOOL_RUN_PROMPT, &input);

        let decision = ctx
            .approve(&key(AIDER_TOOL_RUN_PROMPT), "Approve prompt to run in Aider?", Some(prompt))
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::json(
                &ctx.call_id,
                &serde_json::json!({
                    "responses": [],
                    "updatedFiles": [],
                    "deniedReason": reason,
                    "error": "Aider prompt execution denied by user. Update the prompt based on the denied reason or cancel and do not run again.",
                }),
            ));
        }

        let responses = match self.pair.run_prompt(prompt).await {
            Ok(responses) => responses,
            Err(e) => {
                return Ok(ToolResult::error(
                    &ctx.call_id,
                    format!("Error running prompt in Aider: {e}"),
                ));
            }
        };
        ctx.events.loading(Some("Thinking..."));

        let mut updated_files: Vec<&str> = Vec::new();
        for file in responses.iter().flat_map(|r| r.edited_files.iter()) {
            if !updated_files.contains(&file.as_str()) {
                updated_files.push(file);
            }
        }
        let responses: Vec<Value> = responses
            .iter()
            .map(|r| serde_json::json!({ "messageId": r.message_id, "content": r.content.trim() }))
            .collect();

        Ok(ToolResult::json(
            &ctx.call_id,
            &serde_json::json!({ "responses": responses, "updatedFiles": updated_files }),
        ))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory collaborator that replays canned responses.
    #[derive(Default)]
    pub struct FakePair {
        pub files: Mutex<Vec<ContextFile>>,
        pub responses: Mutex<Vec<PairResponse>>,
        pub prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PairProgrammer for FakePair {
        async fn context_files(&self) -> Vec<ContextFile> {
            self.files.lock().unwrap().clone()
        }

        async fn add_file(&self, file: ContextFile) -> bool {
            let mut files = self.files.lock().unwrap();
            if files.iter().any(|f| f.path == file.path) {
                return false;
            }
            files.push(file);
            true
        }

        async fn drop_file(&self, path: &str) {
            self.files.lock().unwrap().retain(|f| f.path != path);
        }

        async fn run_prompt(&self, prompt: &str) -> anyhow::Result<Vec<PairResponse>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(std::mem::take(&mut *self.responses.lock().unwrap()))
        }
    }
}
