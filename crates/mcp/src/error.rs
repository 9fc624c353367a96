//! Error types for the MCP crate.

use std::time::Duration;

use crate::types::JsonRpcError;

/// Errors that can occur while talking to an MCP server.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The server process could not be started.
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The server answered with a JSON-RPC error.
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// A response arrived without result or error.
    #[error("Empty response to '{0}'")]
    EmptyResponse(String),

    /// No response within the request timeout.
    #[error("Request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The MCP server process exited or is unavailable.
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}
