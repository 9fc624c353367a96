//! Unit tests for the Claude tool provider.

use serde_json::json;

use desk_tool_runtime::{
    AssistantContent, CacheHint, ConversationMessage, FinishReason, StreamEvent, ToolCall, ToolDefinition,
    ToolResult, TurnRequest,
};

use super::sse::{finish_reason, SseDecoder};
use super::streaming::ClaudeToolProvider;
use crate::providers::stream::SseDecode;
use super::translate::{message_to_claude, messages_to_claude, system_to_claude, tool_definition_to_claude};

fn decode(body: &str) -> Vec<StreamEvent> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.feed(body.as_bytes());
    events.extend(decoder.finish());
    events
}

fn sse(event: &str, data: serde_json::Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

fn assistant(text: Option<&str>, tool_calls: Vec<ToolCall>) -> ConversationMessage {
    ConversationMessage::Assistant(AssistantContent {
        text: text.map(String::from),
        tool_calls,
        ..Default::default()
    })
}

#[test]
fn test_tool_definition_translation() {
    let def = ToolDefinition {
        name: "power---bash".to_string(),
        description: "Execute a bash command".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The command to run" }
            },
            "required": ["command"]
        }),
    };

    let claude_json = tool_definition_to_claude(&def);

    assert_eq!(claude_json["name"], "power---bash");
    assert_eq!(claude_json["description"], "Execute a bash command");
    assert_eq!(claude_json["input_schema"]["properties"]["command"]["type"], "string");
}

#[test]
fn test_assistant_mixed_content_translation() {
    let msg = assistant(
        Some("Let me check that."),
        vec![ToolCall {
            id: "toolu_01".to_string(),
            name: "power---bash".to_string(),
            input: json!({"command": "ls -la"}),
        }],
    );
    let (role, content) = message_to_claude(&msg).unwrap();

    assert_eq!(role, "assistant");
    assert_eq!(content.len(), 2);
    assert_eq!(content[0]["type"], "text");
    assert_eq!(content[1]["type"], "tool_use");
    assert_eq!(content[1]["id"], "toolu_01");
    assert_eq!(content[1]["input"]["command"], "ls -la");
}

#[test]
fn test_reasoning_is_not_replayed() {
    let msg = ConversationMessage::Assistant(AssistantContent {
        text: Some("Done.".to_string()),
        reasoning: Some("thinking it over".to_string()),
        ..Default::default()
    });
    let (_, content) = message_to_claude(&msg).unwrap();
    assert_eq!(content, vec![json!({"type": "text", "text": "Done."})]);
}

#[test]
fn test_tool_results_share_one_user_turn() {
    let messages = vec![
        ConversationMessage::User("list files".to_string()),
        assistant(
            None,
            vec![
                ToolCall {
                    id: "t1".to_string(),
                    name: "power---glob".to_string(),
                    input: json!({"pattern": "*"}),
                },
                ToolCall {
                    id: "t2".to_string(),
                    name: "power---grep".to_string(),
                    input: json!({}),
                },
            ],
        ),
        ConversationMessage::ToolResult(ToolResult::success("t1", "[\"a.rs\"]")),
        ConversationMessage::ToolResult(ToolResult::error("t2", "bad args")),
    ];

    let out = messages_to_claude(&messages, CacheHint::None);
    assert_eq!(out.len(), 3);
    assert_eq!(out[2]["role"], "user");
    let results = out[2]["content"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["tool_use_id"], "t1");
    assert_eq!(results[1]["is_error"], true);
    assert!(out[2]["content"][1].get("cache_control").is_none());
}

#[test]
fn test_empty_messages_are_dropped() {
    let messages = vec![
        ConversationMessage::User("hi".to_string()),
        assistant(Some(""), vec![]),
        ConversationMessage::User("again".to_string()),
    ];
    let out = messages_to_claude(&messages, CacheHint::None);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["content"].as_array().unwrap().len(), 2);
}

#[test]
fn test_ephemeral_cache_marks_last_block() {
    let messages = vec![
        ConversationMessage::User("first".to_string()),
        assistant(Some("ok"), vec![]),
        ConversationMessage::User("second".to_string()),
    ];
    let out = messages_to_claude(&messages, CacheHint::Ephemeral);
    assert_eq!(out[2]["content"][0]["cache_control"], json!({"type": "ephemeral"}));
    assert!(out[0]["content"][0].get("cache_control").is_none());
}

#[test]
fn test_system_messages_join_system_prompt() {
    let messages = vec![
        ConversationMessage::System("Extra rule".to_string()),
        ConversationMessage::User("go".to_string()),
    ];
    let system = system_to_claude(Some("You are a coder."), &messages).unwrap();
    assert_eq!(
        system,
        json!([
            {"type": "text", "text": "You are a coder."},
            {"type": "text", "text": "Extra rule"},
        ])
    );
    assert_eq!(messages_to_claude(&messages, CacheHint::None).len(), 1);
    assert!(system_to_claude(None, &[]).is_none());
}

#[test]
fn test_request_body() {
    let provider = ClaudeToolProvider::new("key".to_string(), "claude-test".to_string(), "http://localhost/".to_string());
    let request = TurnRequest {
        system_prompt: Some("sys".to_string()),
        messages: vec![ConversationMessage::User("hello".to_string())],
        tools: vec![],
        temperature: 0.1,
        max_tokens: 1024,
        cache: CacheHint::None,
    };
    let body = provider.request_body(&request);
    assert_eq!(body["model"], "claude-test");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 1024);
    assert_eq!(body["system"][0]["text"], "sys");
    assert!(body.get("tools").is_none());
}

#[test]
fn test_text_stream_with_usage() {
    let body = [
        sse(
            "message_start",
            json!({"type": "message_start", "message": {"usage": {
                "input_tokens": 120, "output_tokens": 1,
                "cache_creation_input_tokens": 30, "cache_read_input_tokens": 900
            }}}),
        ),
        sse(
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        "event: ping\ndata: {\"type\": \"ping\"}\n\n".to_string(),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": " world"}}),
        ),
        sse("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
        sse(
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 42}}),
        ),
        sse("message_stop", json!({"type": "message_stop"})),
    ]
    .concat();

    let events = decode(&body);
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "Hello"));
    assert!(matches!(&events[1], StreamEvent::TextDelta { text } if text == " world"));
    match &events[2] {
        StreamEvent::MessageEnd {
            finish_reason,
            usage,
            provider_metadata,
        } => {
            assert_eq!(*finish_reason, FinishReason::Stop);
            assert_eq!(usage.prompt_tokens, 120);
            assert_eq!(usage.completion_tokens, 42);
            assert_eq!(provider_metadata["anthropic"]["cacheCreationInputTokens"], 30);
            assert_eq!(provider_metadata["anthropic"]["cacheReadInputTokens"], 900);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_tool_use_stream_resolves_ids() {
    let body = [
        sse(
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Checking."}}),
        ),
        sse("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
        sse(
            "content_block_start",
            json!({"type": "content_block_start", "index": 1,
                   "content_block": {"type": "tool_use", "id": "toolu_9", "name": "power---bash", "input": {}}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": ""}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 1,
                   "delta": {"type": "input_json_delta", "partial_json": "{\"command\":"}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 1,
                   "delta": {"type": "input_json_delta", "partial_json": "\"ls\"}"}}),
        ),
        sse("content_block_stop", json!({"type": "content_block_stop", "index": 1})),
        sse(
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 7}}),
        ),
        sse("message_stop", json!({"type": "message_stop"})),
    ]
    .concat();

    let events = decode(&body);
    let names: Vec<String> = events
        .iter()
        .map(|e| match e {
            StreamEvent::TextDelta { .. } => "text".to_string(),
            StreamEvent::ToolCallStart { id, name } => format!("start:{id}:{name}"),
            StreamEvent::ToolCallDelta { id, arguments_delta } => format!("delta:{id}:{arguments_delta}"),
            StreamEvent::ToolCallEnd { id } => format!("end:{id}"),
            StreamEvent::MessageEnd { finish_reason, .. } => format!("finish:{finish_reason:?}"),
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        names,
        vec![
            "text",
            "start:toolu_9:power---bash",
            "delta:toolu_9:{\"command\":",
            "delta:toolu_9:\"ls\"}",
            "end:toolu_9",
            "finish:ToolCalls",
        ]
    );
}

#[test]
fn test_thinking_blocks_become_reasoning() {
    let body = [
        sse(
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "thinking_delta", "thinking": "Consider the tests"}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "abc"}}),
        ),
        sse("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
    ]
    .concat();

    let events = decode(&body);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::ReasoningDelta { text } if text == "Consider the tests"));
}

#[test]
fn test_chunks_split_anywhere() {
    let body = [
        sse(
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "héllo ✓"}}),
        ),
    ]
    .concat();

    // One byte at a time splits both lines and multi-byte characters.
    let mut decoder = SseDecoder::new();
    let mut events = Vec::new();
    for byte in body.as_bytes() {
        events.extend(decoder.feed(std::slice::from_ref(byte)));
    }
    events.extend(decoder.finish());

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "héllo ✓"));
}

#[test]
fn test_trailing_event_without_blank_line() {
    let body = "event: message_stop\ndata: {\"type\":\"message_stop\"}";
    let events = decode(body);
    assert!(matches!(
        &events[0],
        StreamEvent::MessageEnd {
            finish_reason: FinishReason::Unknown,
            ..
        }
    ));
}

#[test]
fn test_error_event() {
    let body = sse(
        "error",
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
    );
    let events = decode(&body);
    assert!(matches!(&events[0], StreamEvent::Error { message } if message == "Overloaded"));
}

#[test]
fn test_no_cache_counters_means_null_metadata() {
    let body = [
        sse(
            "message_start",
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 5, "output_tokens": 1}}}),
        ),
        sse("message_stop", json!({"type": "message_stop"})),
    ]
    .concat();
    match &decode(&body)[0] {
        StreamEvent::MessageEnd { provider_metadata, .. } => assert!(provider_metadata.is_null()),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_stop_reason_mapping() {
    assert_eq!(finish_reason("end_turn"), FinishReason::Stop);
    assert_eq!(finish_reason("stop_sequence"), FinishReason::Stop);
    assert_eq!(finish_reason("tool_use"), FinishReason::ToolCalls);
    assert_eq!(finish_reason("max_tokens"), FinishReason::Length);
    assert_eq!(finish_reason("refusal"), FinishReason::Other);
    assert_eq!(finish_reason("something_new"), FinishReason::Unknown);
}
