//! MCP (Model Context Protocol) client side for the desk agent.
//!
//! Starts the configured tool servers, keeps their connections in line with
//! the configuration, and offers their tools to agent runs.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **transport**: newline-delimited message halves (process stdio, channels)
//! - **launch**: config interpolation and platform command fixes
//! - **client**: request/response routing, handshake, tool listing and calls
//! - **connector**: live connections and the factory that opens them
//! - **registry**: reconciliation of connections with the configured servers
//! - **adapter**: server tools as agent tools, gated and throttled
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use desk_mcp::{McpRegistry, McpToolSource, StdioConnectionFactory};
//!
//! # fn example(servers: std::collections::BTreeMap<String, desk_core::McpServerConfig>) {
//! let registry = Arc::new(McpRegistry::new(Arc::new(StdioConnectionFactory::new())));
//! let source = Arc::new(McpToolSource::new(registry, servers));
//! // hand `source` to `AgenticLoop::with_external_tools`
//! # }
//! ```

pub mod adapter;
pub mod client;
pub mod connector;
pub mod error;
pub mod launch;
pub mod registry;
pub mod transport;
pub mod types;

pub use adapter::{McpToolAdapter, McpToolSource};
pub use client::{McpClient, MCP_CLIENT_TIMEOUT};
pub use connector::{ConnectionFactory, McpConnection, McpConnector, StdioConnectionFactory};
pub use error::McpError;
pub use registry::McpRegistry;
pub use transport::McpTransport;
pub use types::{CallToolResult, ToolContent, ToolInfo};
