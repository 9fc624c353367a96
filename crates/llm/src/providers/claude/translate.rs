//! Translation between provider-agnostic conversation types and the Claude API format.

use serde_json::{json, Value};

use desk_tool_runtime::{CacheHint, ConversationMessage, ToolDefinition};

/// Translate a [`ToolDefinition`] into the Claude API tool format.
pub(super) fn tool_definition_to_claude(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

/// Role and content blocks of one message. System messages have no place
/// in the message list and yield `None`.
pub(super) fn message_to_claude(msg: &ConversationMessage) -> Option<(&'static str, Vec<Value>)> {
    match msg {
        ConversationMessage::System(_) => None,
        ConversationMessage::User(text) => Some(("user", text_block(text).into_iter().collect())),
        ConversationMessage::Assistant(content) => {
            // Reasoning is not replayed: the API only accepts signed thinking blocks.
            let mut blocks: Vec<Value> = content.text.as_deref().and_then(text_block).into_iter().collect();
            for tc in &content.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": tc.input,
                }));
            }
            Some(("assistant", blocks))
        }
        ConversationMessage::ToolResult(result) => {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": result.tool_call_id,
                "is_error": result.is_error,
            });
            if !result.content.is_empty() {
                block["content"] = json!(result.content);
            }
            Some(("user", vec![block]))
        }
    }
}

/// Build the message list. Consecutive messages of one role are merged so
/// the parallel tool results of a step travel in a single user turn.
pub(super) fn messages_to_claude(messages: &[ConversationMessage], cache: CacheHint) -> Vec<Value> {
    let mut out: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for (role, blocks) in messages.iter().filter_map(message_to_claude) {
        if blocks.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => out.push((role, blocks)),
        }
    }

    if cache == CacheHint::Ephemeral {
        if let Some(block) = out.last_mut().and_then(|(_, blocks)| blocks.last_mut()) {
            block["cache_control"] = ephemeral();
        }
    }

    out.into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

/// The system prompt followed by any system messages of the conversation.
pub(super) fn system_to_claude(system_prompt: Option<&str>, messages: &[ConversationMessage]) -> Option<Value> {
    let extra = messages.iter().filter_map(|m| match m {
        ConversationMessage::System(text) => Some(text.as_str()),
        _ => None,
    });
    let blocks: Vec<Value> = system_prompt.into_iter().chain(extra).filter_map(text_block).collect();
    (!blocks.is_empty()).then(|| Value::Array(blocks))
}

fn text_block(text: &str) -> Option<Value> {
    (!text.is_empty()).then(|| json!({"type": "text", "text": text}))
}

fn ephemeral() -> Value {
    json!({"type": "ephemeral"})
}
