//! Server tools exposed to the agent as ordinary [`Tool`]s.

use async_trait::async_trait;
use desk_core::{AgentProfile, McpServerConfig};
use desk_tool_runtime::{
    ApprovalDecision, CallThrottle, ExternalTool, ExternalTools, Tool, ToolContext, ToolDefinition, ToolError,
    ToolId, ToolResult,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::connector::McpConnection;
use crate::registry::McpRegistry;
use crate::types::ToolInfo;

/// One tool of one server.
pub struct McpToolAdapter {
    server_name: String,
    info: ToolInfo,
    connection: Arc<dyn McpConnection>,
    throttle: Arc<CallThrottle>,
}

impl McpToolAdapter {
    pub fn new(
        server_name: impl Into<String>,
        info: ToolInfo,
        connection: Arc<dyn McpConnection>,
        throttle: Arc<CallThrottle>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            info,
            connection,
            throttle,
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn definition(&self) -> ToolDefinition {
        self.info.clone().into()
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let tool_name = &self.info.name;
        ctx.notify_started(&self.server_name, tool_name, &input);

        let key = ToolId::new(&self.server_name, tool_name).canonical();
        let question = format!("Approve tool {tool_name} from {} MCP server?", self.server_name);
        let subject = input.to_string();
        if let ApprovalDecision::Denied(user_input) = ctx.approve(&key, &question, Some(&subject)).await {
            warn!(tool = %key, "Tool execution denied by user");
            let mut message = "Tool execution denied by user.".to_string();
            if let Some(user_input) = user_input {
                message.push_str(&format!(" User input: {user_input}"));
            }
            return Ok(ToolResult::success(&ctx.call_id, message));
        }

        self.throttle.wait().await;
        debug!(tool = %key, "Executing MCP tool");
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                self.throttle.record().await;
                return Ok(ToolResult::error(&ctx.call_id, "Tool execution cancelled."));
            }
            outcome = self.connection.call_tool(tool_name, input) => outcome,
        };
        self.throttle.record().await;

        Ok(match outcome {
            Ok(result) if result.is_error => ToolResult::error(&ctx.call_id, result.text()),
            Ok(result) => ToolResult::success(&ctx.call_id, result.text()),
            Err(e) => {
                error!(tool = %key, error = %e, "Error executing MCP tool");
                ToolResult::error(&ctx.call_id, format!("Error executing tool {tool_name}: {e}"))
            }
        })
    }
}

/// Feeds the tools of the enabled servers into agent runs.
pub struct McpToolSource {
    registry: Arc<McpRegistry>,
    servers: RwLock<BTreeMap<String, McpServerConfig>>,
    /// Kept across runs so the gap also holds between them.
    throttle: Mutex<Option<(u64, Arc<CallThrottle>)>>,
}

impl McpToolSource {
    pub fn new(registry: Arc<McpRegistry>, servers: BTreeMap<String, McpServerConfig>) -> Self {
        Self {
            registry,
            servers: RwLock::new(servers),
            throttle: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<McpRegistry> {
        &self.registry
    }

    /// Replace the configured servers; takes effect on the next run.
    pub fn set_servers(&self, servers: BTreeMap<String, McpServerConfig>) {
        match self.servers.write() {
            Ok(mut current) => *current = servers,
            Err(e) => *e.into_inner() = servers,
        }
    }

    fn throttle(&self, min_interval_ms: u64) -> Arc<CallThrottle> {
        let mut slot = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((ms, throttle)) if *ms == min_interval_ms => throttle.clone(),
            _ => {
                let throttle = Arc::new(CallThrottle::from_millis(min_interval_ms));
                *slot = Some((min_interval_ms, throttle.clone()));
                throttle
            }
        }
    }
}

#[async_trait]
impl ExternalTools for McpToolSource {
    async fn prepare(&self, project_dir: &Path, profile: &AgentProfile) -> anyhow::Result<()> {
        let servers = self
            .servers
            .read()
            .map_err(|_| anyhow::anyhow!("server configuration lock poisoned"))?
            .clone();
        let ready = self
            .registry
            .reinitialize(&servers, Some(project_dir), false, Some(&profile.enabled_servers))
            .await;
        debug!(ready = ready.len(), configured = servers.len(), "MCP servers reconciled");
        Ok(())
    }

    async fn tools(&self, profile: &AgentProfile) -> Vec<ExternalTool> {
        let throttle = self.throttle(profile.min_time_between_tool_calls);
        self.registry
            .connectors()
            .await
            .into_iter()
            .filter(|connector| profile.enabled_servers.contains(&connector.server_name))
            .flat_map(|connector| {
                connector
                    .tools
                    .iter()
                    .map(|info| ExternalTool {
                        server_name: connector.server_name.clone(),
                        tool: Arc::new(McpToolAdapter::new(
                            connector.server_name.clone(),
                            info.clone(),
                            connector.connection.clone(),
                            throttle.clone(),
                        )) as Arc<dyn Tool>,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
