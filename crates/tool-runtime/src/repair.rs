//! Repair of tool calls the model got wrong.
//!
//! Unknown names and malformed arguments are rewritten into calls to the
//! helper tools, so the model learns about the mistake from a tool result
//! instead of the turn failing. Calls that fail during execution get one
//! attempt at corrected arguments from the model itself.

use desk_core::tools::{
    qualified, HELPERS_TOOL_GROUP_NAME, HELPERS_TOOL_INVALID_TOOL_ARGUMENTS, HELPERS_TOOL_NO_SUCH_TOOL,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::conversation::{AssistantContent, ConversationMessage};
use crate::provider::{ToolAwareLlmProvider, TurnRequest};
use crate::registry::ToolRegistry;
use crate::schema::validate_arguments;
use crate::stream::{RawToolCall, TurnCollector};
use crate::tool::{ToolCall, ToolResult};

/// Map a streamed call onto a registered tool with parsed, schema-checked
/// arguments, rewriting it to a helper call when that is not possible.
pub fn resolve_call(registry: &ToolRegistry, raw: &RawToolCall) -> ToolCall {
    let name = match registry.get(&raw.name) {
        Some(_) => raw.name.clone(),
        None => {
            warn!(tool = %raw.name, "Attempted to call non-existent tool");
            match registry.find_by_suffix(&raw.name) {
                Some(full_name) => {
                    info!(tool = %raw.name, matched = %full_name, "Retrying with full tool name");
                    full_name
                }
                None => {
                    return ToolCall {
                        id: raw.id.clone(),
                        name: qualified(HELPERS_TOOL_GROUP_NAME, HELPERS_TOOL_NO_SUCH_TOOL),
                        input: json!({
                            "toolName": raw.name,
                            "availableTools": registry.names(),
                        }),
                    };
                }
            }
        }
    };

    let input = match parse_arguments(&raw.arguments) {
        Ok(input) => input,
        Err(e) => return invalid_arguments(raw, &name, raw.arguments.clone(), e),
    };

    if let Some(entry) = registry.get(&name) {
        if let Err(e) = validate_arguments(&entry.tool.definition().input_schema, &input) {
            return invalid_arguments(raw, &name, input.to_string(), e);
        }
    }

    ToolCall {
        id: raw.id.clone(),
        name,
        input,
    }
}

/// Empty argument text means an argument-less call.
fn parse_arguments(arguments: &str) -> Result<Value, String> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(arguments).map_err(|e| format!("arguments are not valid JSON: {e}"))
}

fn invalid_arguments(raw: &RawToolCall, name: &str, tool_args: String, error: String) -> ToolCall {
    warn!(tool = %name, args = %tool_args, error = %error, "Invalid arguments for tool");
    ToolCall {
        id: raw.id.clone(),
        name: qualified(HELPERS_TOOL_GROUP_NAME, HELPERS_TOOL_INVALID_TOOL_ARGUMENTS),
        input: json!({
            "toolName": name,
            "toolArgs": tool_args,
            "error": error,
        }),
    }
}

/// Replay a failed call and its error to the model and ask for the same tool
/// again. Returns the corrected arguments, or `None` when the model did not
/// retry the same tool.
pub async fn repair_with_model(
    provider: &dyn ToolAwareLlmProvider,
    mut request: TurnRequest,
    call: &ToolCall,
    error: &str,
) -> Option<Value> {
    info!(tool = %call.name, "Attempting generic repair for tool call error");

    request.messages.push(ConversationMessage::Assistant(AssistantContent {
        tool_calls: vec![call.clone()],
        ..Default::default()
    }));
    request
        .messages
        .push(ConversationMessage::ToolResult(ToolResult::error(&call.id, error)));

    let events = match provider.complete_with_tools(request).await {
        Ok(events) => events,
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Error during tool call repair");
            return None;
        }
    };

    let mut turn = TurnCollector::default();
    for event in &events {
        turn.push(event);
    }

    let retried = turn
        .tool_calls()
        .into_iter()
        .find(|candidate| candidate.name == call.name)?;
    match parse_arguments(&retried.arguments) {
        Ok(input) => Some(input),
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Repaired tool call has unusable arguments");
            None
        }
    }
}
