//! Translation between provider-agnostic conversation types and the
//! chat-completions format.

use serde_json::{json, Value};

use desk_tool_runtime::{CacheHint, ConversationMessage, ToolDefinition};

/// Translate a [`ToolDefinition`] into a chat-completions function tool.
pub(super) fn tool_definition_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

/// One chat message. Empty assistant turns yield `None`.
pub(super) fn message_to_openai(msg: &ConversationMessage) -> Option<Value> {
    match msg {
        ConversationMessage::System(text) => Some(json!({"role": "system", "content": text})),
        ConversationMessage::User(text) => Some(json!({"role": "user", "content": text})),
        ConversationMessage::Assistant(content) => {
            let text = content.text.as_deref().filter(|t| !t.is_empty());
            if text.is_none() && content.tool_calls.is_empty() {
                return None;
            }
            let mut message = json!({"role": "assistant", "content": text});
            if !content.tool_calls.is_empty() {
                let calls: Vec<Value> = content
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.input.to_string(),
                            }
                        })
                    })
                    .collect();
                message["tool_calls"] = json!(calls);
            }
            Some(message)
        }
        ConversationMessage::ToolResult(result) => Some(json!({
            "role": "tool",
            "tool_call_id": result.tool_call_id,
            "content": result.content,
        })),
    }
}

/// The system prompt followed by the conversation. With an ephemeral cache
/// hint the last text message becomes a content part with cache control.
pub(super) fn messages_to_openai(
    system_prompt: Option<&str>,
    messages: &[ConversationMessage],
    cache: CacheHint,
) -> Vec<Value> {
    let mut out: Vec<Value> = system_prompt
        .filter(|s| !s.is_empty())
        .map(|s| json!({"role": "system", "content": s}))
        .into_iter()
        .collect();
    out.extend(messages.iter().filter_map(message_to_openai));

    if cache == CacheHint::Ephemeral {
        if let Some(last) = out.last_mut() {
            if let Some(text) = last["content"].as_str().map(String::from) {
                last["content"] = json!([{
                    "type": "text",
                    "text": text,
                    "cache_control": {"type": "ephemeral"},
                }]);
            }
        }
    }
    out
}
