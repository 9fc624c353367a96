//! Live connections to configured servers.

use async_trait::async_trait;
use desk_core::McpServerConfig;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{McpClient, MCP_CLIENT_TIMEOUT};
use crate::error::McpError;
use crate::launch::launch_command;
use crate::transport::McpTransport;
use crate::types::{CallToolResult, ToolInfo};

/// What the rest of the crate needs from a connected server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError>;

    async fn close(&self) -> Result<(), McpError>;
}

#[async_trait]
impl McpConnection for McpClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        McpClient::call_tool(self, name, arguments).await
    }

    async fn close(&self) -> Result<(), McpError> {
        McpClient::close(self).await
    }
}

/// A server connection together with the config it was started from and
/// the tools it advertised at startup.
pub struct McpConnector {
    pub server_name: String,
    /// Interpolated config, compared on reconciliation.
    pub config: McpServerConfig,
    pub tools: Vec<ToolInfo>,
    pub connection: Arc<dyn McpConnection>,
}

impl std::fmt::Debug for McpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpConnector")
            .field("server_name", &self.server_name)
            .field("config", &self.config)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Opens connections for the registry.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Connect to a server using an already interpolated config.
    async fn connect(
        &self,
        server_name: &str,
        config: &McpServerConfig,
        project_dir: Option<&Path>,
    ) -> Result<McpConnector, McpError>;
}

/// Starts each server as a child process speaking MCP over stdio.
pub struct StdioConnectionFactory {
    timeout: Duration,
}

impl StdioConnectionFactory {
    pub fn new() -> Self {
        Self {
            timeout: MCP_CLIENT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for StdioConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for StdioConnectionFactory {
    async fn connect(
        &self,
        server_name: &str,
        config: &McpServerConfig,
        project_dir: Option<&Path>,
    ) -> Result<McpConnector, McpError> {
        info!(server = server_name, "Initializing MCP client");
        debug!(server = server_name, config = %config.canonical(), "Server configuration");

        let launch = launch_command(server_name, config, project_dir);
        let transport = McpTransport::spawn(&launch)?;
        let client = McpClient::connect(server_name, transport, self.timeout).await?;
        let tools = client.list_tools().await?;
        debug!(server = server_name, count = tools.len(), "Found tools for MCP server");

        info!(server = server_name, "MCP client initialized successfully");
        Ok(McpConnector {
            server_name: server_name.to_string(),
            config: config.clone(),
            tools,
            connection: Arc::new(client),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_command_fails_to_connect() {
        let config = McpServerConfig {
            command: "no-such-mcp-server-on-path".to_string(),
            args: vec![],
            env: Default::default(),
            cwd: None,
        };
        let err = StdioConnectionFactory::new()
            .connect("missing", &config, None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_client_as_connection() {
        let client = McpClient::connect("fake", crate::client::testing::fake_server(), MCP_CLIENT_TIMEOUT)
            .await
            .unwrap();
        let connection: Arc<dyn McpConnection> = Arc::new(client);
        let result = connection
            .call_tool("echo", serde_json::json!({"text": "via trait"}))
            .await
            .unwrap();
        assert_eq!(result.text(), "via trait\ndone");
        connection.close().await.unwrap();
    }
}
