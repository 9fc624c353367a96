use async_trait::async_trait;
use desk_core::tools::{qualified, POWER_TOOL_FETCH, POWER_TOOL_GROUP_NAME};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::denied;
use crate::approval::ApprovalDecision;
use crate::tool::{
    optional_u64, required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult,
};

/// HTTP GET of a URL, returning the response body as text.
pub struct FetchTool {
    client: reqwest::Client,
}

impl FetchTool {
    const DEFAULT_TIMEOUT_MS: u64 = 60_000;

    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: url::Url, timeout: Duration) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_url(raw: &str) -> Option<url::Url> {
    url::Url::parse(raw)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
}

#[async_trait]
impl Tool for FetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: POWER_TOOL_FETCH.to_string(),
            description: "Fetches the content of a web page or other resource by URL and returns it as text.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to fetch."
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Timeout for the fetch operation in milliseconds. Default: 60000 ms."
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let raw_url = required_str(&input, "url")?;
        let timeout_ms = optional_u64(&input, "timeout").unwrap_or(Self::DEFAULT_TIMEOUT_MS);
        ctx.notify_started(POWER_TOOL_GROUP_NAME, POWER_TOOL_FETCH, &input);

        let key = qualified(POWER_TOOL_GROUP_NAME, POWER_TOOL_FETCH);
        let subject = format!("URL: {raw_url}\nTimeout: {timeout_ms}ms");
        let question = format!("Approve fetching content from URL '{raw_url}'?");
        if let ApprovalDecision::Denied(reason) = ctx.approve(&key, &question, Some(&subject)).await {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(&format!("URL fetch from '{raw_url}'"), reason),
            ));
        }

        let Some(url) = parse_url(raw_url) else {
            return Ok(ToolResult::success(
                &ctx.call_id,
                format!("Error: Invalid URL provided: {raw_url}. Please provide a valid URL."),
            ));
        };

        debug!(%url, timeout_ms, "fetching url");
        let content = match self.fetch(url, Duration::from_millis(timeout_ms)).await {
            Ok(body) => body,
            Err(e) => format!("Error: {e}"),
        };
        Ok(ToolResult::success(&ctx.call_id, content))
    }
}
