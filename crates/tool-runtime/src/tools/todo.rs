//! Task list persisted under the project's `.aider-desk` directory.

use async_trait::async_trait;
use desk_core::tools::{
    qualified, TODO_TOOL_CLEAR_ITEMS, TODO_TOOL_GET_ITEMS, TODO_TOOL_GROUP_NAME,
    TODO_TOOL_SET_ITEMS, TODO_TOOL_UPDATE_ITEM_COMPLETION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::denied;
use crate::approval::ApprovalDecision;
use crate::tool::{optional_bool, required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

pub const TODO_FILE_PATH: &str = ".aider-desk/todos.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub name: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoData {
    pub initial_user_prompt: String,
    pub items: Vec<TodoItem>,
}

fn todo_path(base: &Path) -> PathBuf {
    base.join(TODO_FILE_PATH)
}

/// `None` when the file does not exist yet.
async fn read_todos(base: &Path) -> anyhow::Result<Option<TodoData>> {
    match tokio::fs::read_to_string(todo_path(base)).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_todos(base: &Path, data: &TodoData) -> anyhow::Result<()> {
    let path = todo_path(base);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, serde_json::to_string_pretty(data)?).await?;
    Ok(())
}

fn key(tool: &str) -> String {
    qualified(TODO_TOOL_GROUP_NAME, tool)
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

pub struct SetItemsTool;

#[async_trait]
impl Tool for SetItemsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TODO_TOOL_SET_ITEMS.to_string(),
            description: "Initializes or overwrites the current list of todo items. This tool accepts an array of todo items, each with a name (string) and completed (boolean) property. It also accepts the initialUserPrompt as an argument, allowing the agent to store the original request context for future reference.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "items": {
                        "type": "array",
                        "description": "An array of todo items.",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string", "description": "The name of the todo item." },
                                "completed": { "type": "boolean", "description": "Whether the todo item is completed." }
                            },
                            "required": ["name"]
                        }
                    },
                    "initialUserPrompt": {
                        "type": "string",
                        "description": "The original user prompt that initiated the task."
                    }
                },
                "required": ["items", "initialUserPrompt"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let initial_user_prompt = required_str(&input, "initialUserPrompt")?.to_string();
        let items: Vec<TodoItem> = input
            .get("items")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ToolError::InvalidInput(format!("invalid 'items': {e}")))?
            .ok_or_else(|| ToolError::InvalidInput("missing 'items' field".to_string()))?;
        ctx.notify_started(TODO_TOOL_GROUP_NAME, TODO_TOOL_SET_ITEMS, &input);

        let items_json = serde_json::to_string(&items).unwrap_or_default();
        let subject = format!("Initial User Prompt: {initial_user_prompt}\nItems: {items_json}");
        let decision = ctx
            .approve(
                &key(TODO_TOOL_SET_ITEMS),
                "Approve setting todo items? This will overwrite any existing todo list.",
                Some(&subject),
            )
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::success(&ctx.call_id, denied("Setting todo items", reason)));
        }

        let data = TodoData { initial_user_prompt, items };
        let message = match write_todos(&ctx.working_directory, &data).await {
            Ok(()) => "Todo items set successfully.".to_string(),
            Err(e) => format!("Error setting todo items: {e}"),
        };
        Ok(ToolResult::success(&ctx.call_id, message))
    }
}

pub struct GetItemsTool;

#[async_trait]
impl Tool for GetItemsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TODO_TOOL_GET_ITEMS.to_string(),
            description: "Retrieves the current list of todo items, including their names and completion statuses.".to_string(),
            input_schema: empty_schema(),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        ctx.notify_started(TODO_TOOL_GROUP_NAME, TODO_TOOL_GET_ITEMS, &input);

        let decision = ctx
            .approve(&key(TODO_TOOL_GET_ITEMS), "Approve getting todo items?", None)
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::success(&ctx.call_id, denied("Getting todo items", reason)));
        }

        let result = match read_todos(&ctx.working_directory).await {
            Ok(Some(data)) => match serde_json::to_value(&data) {
                Ok(value) => ToolResult::json(&ctx.call_id, &value),
                Err(e) => ToolResult::success(&ctx.call_id, format!("Error getting todo items: {e}")),
            },
            Ok(None) => ToolResult::success(&ctx.call_id, "No todo items found."),
            Err(e) => ToolResult::success(&ctx.call_id, format!("Error getting todo items: {e}")),
        };
        Ok(result)
    }
}

pub struct UpdateItemCompletionTool;

#[async_trait]
impl Tool for UpdateItemCompletionTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TODO_TOOL_UPDATE_ITEM_COMPLETION.to_string(),
            description: "Updates the completed status of a specific todo item by its name.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "The name of the todo item to update." },
                    "completed": { "type": "boolean", "description": "The new completion status for the todo item." }
                },
                "required": ["name", "completed"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let name = required_str(&input, "name")?;
        let completed = optional_bool(&input, "completed")
            .ok_or_else(|| ToolError::InvalidInput("missing 'completed' field".to_string()))?;
        ctx.notify_started(TODO_TOOL_GROUP_NAME, TODO_TOOL_UPDATE_ITEM_COMPLETION, &input);

        let question =
            format!("Approve updating completion status for todo item \"{name}\" to {completed}?");
        let decision = ctx
            .approve(&key(TODO_TOOL_UPDATE_ITEM_COMPLETION), &question, None)
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied("Updating todo item completion", reason),
            ));
        }

        let message = match update(&ctx.working_directory, name, completed).await {
            Ok(message) => message,
            Err(e) => format!("Error updating todo item: {e}"),
        };
        Ok(ToolResult::success(&ctx.call_id, message))
    }
}

async fn update(base: &Path, name: &str, completed: bool) -> anyhow::Result<String> {
    let Some(mut data) = read_todos(base).await? else {
        return Ok("No todo items found to update.".to_string());
    };
    let Some(item) = data.items.iter_mut().find(|item| item.name == name) else {
        return Ok(format!("Todo item with name \"{name}\" not found."));
    };
    item.completed = completed;
    write_todos(base, &data).await?;
    Ok(format!("Todo item \"{name}\" updated successfully to completed: {completed}."))
}

pub struct ClearItemsTool;

#[async_trait]
impl Tool for ClearItemsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TODO_TOOL_CLEAR_ITEMS.to_string(),
            description: "Removes all existing todo items from the list.".to_string(),
            input_schema: empty_schema(),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        ctx.notify_started(TODO_TOOL_GROUP_NAME, TODO_TOOL_CLEAR_ITEMS, &input);

        let decision = ctx
            .approve(
                &key(TODO_TOOL_CLEAR_ITEMS),
                "Approve clearing all todo items? This action cannot be undone.",
                None,
            )
            .await;
        if let ApprovalDecision::Denied(reason) = decision {
            return Ok(ToolResult::success(&ctx.call_id, denied("Clearing todo items", reason)));
        }

        let message = match write_todos(&ctx.working_directory, &TodoData::default()).await {
            Ok(()) => "All todo items cleared successfully.".to_string(),
            Err(e) => format!("Error clearing todo items: {e}"),
        };
        Ok(ToolResult::success(&ctx.call_id, message))
    }
}
