//! Names of the built-in tool groups and their tools.
//!
//! A fully qualified tool id is `<group><SEPARATOR><tool>`, e.g. `power---bash`.

pub const TOOL_GROUP_NAME_SEPARATOR: &str = "---";

pub const AIDER_TOOL_GROUP_NAME: &str = "aider";
pub const AIDER_TOOL_GET_CONTEXT_FILES: &str = "get_context_files";
pub const AIDER_TOOL_ADD_CONTEXT_FILES: &str = "add_context_files";
pub const AIDER_TOOL_DROP_CONTEXT_FILES: &str = "drop_context_files";
pub const AIDER_TOOL_RUN_PROMPT: &str = "run_prompt";

pub const POWER_TOOL_GROUP_NAME: &str = "power";
pub const POWER_TOOL_FILE_EDIT: &str = "file_edit";
pub const POWER_TOOL_FILE_READ: &str = "file_read";
pub const POWER_TOOL_FILE_WRITE: &str = "file_write";
pub const POWER_TOOL_GLOB: &str = "glob";
pub const POWER_TOOL_GREP: &str = "grep";
pub const POWER_TOOL_BASH: &str = "bash";
pub const POWER_TOOL_FETCH: &str = "fetch";

pub const TODO_TOOL_GROUP_NAME: &str = "todo";
pub const TODO_TOOL_SET_ITEMS: &str = "set_items";
pub const TODO_TOOL_GET_ITEMS: &str = "get_items";
pub const TODO_TOOL_UPDATE_ITEM_COMPLETION: &str = "update_item_completion";
pub const TODO_TOOL_CLEAR_ITEMS: &str = "clear_items";

pub const SUBAGENTS_TOOL_GROUP_NAME: &str = "subagents";
pub const SUBAGENTS_TOOL_RUN_TASK: &str = "run_task";

pub const HELPERS_TOOL_GROUP_NAME: &str = "helpers";
pub const HELPERS_TOOL_NO_SUCH_TOOL: &str = "no_such_tool";
pub const HELPERS_TOOL_INVALID_TOOL_ARGUMENTS: &str = "invalid_tool_arguments";

/// Join a group (or server) name and a tool name into a canonical id.
pub fn qualified(group: &str, tool: &str) -> String {
    format!("{group}{TOOL_GROUP_NAME_SEPARATOR}{tool}")
}
