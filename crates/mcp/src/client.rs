//! MCP client implementation.
//!
//! Speaks JSON-RPC to one server over a [`McpTransport`]. A background task
//! reads everything the server sends and routes responses to the request
//! waiting for them, so several calls can be in flight at once.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::transport::{McpReceiver, McpSender, McpTransport};
use crate::types::*;

/// Upper bound for any single request, tool calls included.
pub const MCP_CLIENT_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Name this client reports during the handshake.
pub const CLIENT_NAME: &str = "desk-agent-client";

/// Waiters by request id. `None` once the server has gone away.
type Pending = Arc<Mutex<Option<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>>;
type SharedSender = Arc<tokio::sync::Mutex<Box<dyn McpSender>>>;

/// A connected, initialized MCP client.
pub struct McpClient {
    server_name: String,
    sender: SharedSender,
    pending: Pending,
    next_id: AtomicI64,
    timeout: Duration,
    reader: JoinHandle<()>,
    process: tokio::sync::Mutex<Option<Child>>,
    server_info: InitializeResult,
}

impl McpClient {
    /// Start the read loop and perform the initialize handshake.
    pub async fn connect(
        server_name: impl Into<String>,
        transport: McpTransport,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let server_name = server_name.into();
        let (sender, receiver, process) = transport.into_parts();
        let sender: SharedSender = Arc::new(tokio::sync::Mutex::new(sender));
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));

        let reader = tokio::spawn(read_loop(
            server_name.clone(),
            receiver,
            pending.clone(),
            sender.clone(),
        ));

        let mut client = Self {
            server_name,
            sender,
            pending,
            next_id: AtomicI64::new(1),
            timeout,
            reader,
            process: tokio::sync::Mutex::new(process),
            server_info: InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: Value::Null,
                server_info: Implementation {
                    name: String::new(),
                    version: None,
                },
            },
        };

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: CLIENT_NAME.to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
        };
        client.server_info = client.request_as("initialize", Some(serde_json::to_value(params)?)).await?;
        client.notify("notifications/initialized", None).await?;

        info!(
            server = %client.server_name,
            remote = %client.server_info.server_info.name,
            protocol = %client.server_info.protocol_version,
            "MCP client initialized"
        );
        Ok(client)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    /// Send a request and wait for its result, bounded by the client timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| McpError::ServerUnavailable("pending map poisoned".to_string()))?;
            match pending.as_mut() {
                Some(waiters) => waiters.insert(id, tx),
                None => return Err(self.closed()),
            };
        }
        // Dropped on every exit, including when the caller abandons the future.
        let _waiter = WaiterGuard {
            pending: &self.pending,
            id,
        };

        let message = serde_json::to_string(&JsonRpcRequest::new(RpcId::Number(id), method, params))?;
        debug!(server = %self.server_name, method, id, "Sending request");
        self.sender.lock().await.send(&message).await?;

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(self.closed()),
            Err(_) => {
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if let Some(err) = response.error {
            return Err(err.into());
        }
        response
            .result
            .ok_or_else(|| McpError::EmptyResponse(method.to_string()))
    }

    async fn request_as<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, McpError> {
        let result = self.request(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.sender.lock().await.send(&message).await
    }

    /// All tools of the server, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let params = serde_json::to_value(ListToolsParams { cursor })?;
            let page: ListToolsResult = self.request_as("tools/list", Some(params)).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(server = %self.server_name, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.request_as("tools/call", Some(params)).await
    }

    /// Stop reading and terminate the server process.
    pub async fn close(&self) -> Result<(), McpError> {
        self.reader.abort();
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }
        if let Some(mut child) = self.process.lock().await.take() {
            child.kill().await?;
        }
        debug!(server = %self.server_name, "MCP client closed");
        Ok(())
    }

    #[cfg(test)]
    fn pending_requests(&self) -> usize {
        self.pending
            .lock()
            .map(|pending| pending.as_ref().map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    fn closed(&self) -> McpError {
        McpError::ServerUnavailable(format!("{} closed the connection", self.server_name))
    }
}

/// Removes a request's waiter from the pending map when dropped.
struct WaiterGuard<'a> {
    pending: &'a Pending,
    id: i64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(waiters) = pending.as_mut() {
                waiters.remove(&self.id);
            }
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Route server output until the transport closes, then fail every waiter.
async fn read_loop(server_name: String, mut receiver: Box<dyn McpReceiver>, pending: Pending, sender: SharedSender) {
    loop {
        let line = match receiver.receive().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(server = %server_name, "MCP server closed its output");
                break;
            }
            Err(e) => {
                warn!(server = %server_name, error = %e, "MCP transport failed");
                break;
            }
        };

        match IncomingMessage::parse(&line) {
            Ok(IncomingMessage::Response(response)) => {
                let waiter = match &response.id {
                    RpcId::Number(id) => pending
                        .lock()
                        .ok()
                        .and_then(|mut p| p.as_mut().and_then(|w| w.remove(id))),
                    RpcId::String(_) => None,
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(server = %server_name, id = ?response.id, "Response without a waiting request"),
                }
            }
            Ok(IncomingMessage::Request(request)) => {
                let reply = if request.method == "ping" {
                    JsonRpcResponse::success(request.id, json!({}))
                } else {
                    JsonRpcResponse::error(
                        request.id,
                        error_codes::METHOD_NOT_FOUND,
                        format!("Method not found: {}", request.method),
                    )
                };
                match serde_json::to_string(&reply) {
                    Ok(message) => {
                        if let Err(e) = sender.lock().await.send(&message).await {
                            warn!(server = %server_name, error = %e, "Failed to answer server request");
                        }
                    }
                    Err(e) => warn!(server = %server_name, error = %e, "Failed to encode reply"),
                }
            }
            Ok(IncomingMessage::Notification(notification)) => {
                debug!(server = %server_name, method = %notification.method, "Server notification");
            }
            Err(e) => warn!(server = %server_name, error = %e, "Unparseable message from MCP server"),
        }
    }

    if let Ok(mut pending) = pending.lock() {
        pending.take();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A scripted server on the far end of a channel transport.
    ///
    /// Offers `echo` and `fail` tools across two `tools/list` pages and
    /// never answers `slow`.
    pub(crate) fn fake_server() -> McpTransport {
        let (client_side, server_side) = McpTransport::pair();
        let (mut sender, mut receiver, _) = server_side.into_parts();

        tokio::spawn(async move {
            while let Ok(Some(line)) = receiver.receive().await {
                let Ok(IncomingMessage::Request(req)) = IncomingMessage::parse(&line) else {
                    continue;
                };
                let params = req.params.clone().unwrap_or(Value::Null);
                let reply = match req.method.as_str() {
                    "initialize" => JsonRpcResponse::success(
                        req.id,
                        json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "fake", "version": "0.0.1"}
                        }),
                    ),
                    "tools/list" if params.get("cursor").is_none() => JsonRpcResponse::success(
                        req.id,
                        json!({
                            "tools": [{"name": "echo", "description": "Echo text", "inputSchema": {
                                "type": "object",
                                "properties": {"text": {"type": "string"}},
                                "required": ["text"]
                            }}],
                            "nextCursor": "2"
                        }),
                    ),
                    "tools/list" => JsonRpcResponse::success(
                        req.id,
                        json!({"tools": [{"name": "fail", "description": "Always fails"}]}),
                    ),
                    "tools/call" => match params["name"].as_str() {
                        Some("echo") => JsonRpcResponse::success(
                            req.id,
                            json!({"content": [
                                {"type": "text", "text": params["arguments"]["text"]},
                                {"type": "text", "text": "done"}
                            ]}),
                        ),
                        Some("fail") => JsonRpcResponse::success(
                            req.id,
                            json!({"content": [{"type": "text", "text": "boom"}], "isError": true}),
                        ),
                        Some("slow") => continue,
                        _ => JsonRpcResponse::error(req.id, error_codes::INVALID_PARAMS, "unknown tool"),
                    },
                    _ => JsonRpcResponse::error(req.id, error_codes::METHOD_NOT_FOUND, "Method not found"),
                };
                let Ok(message) = serde_json::to_string(&reply) else {
                    continue;
                };
                if sender.send(&message).await.is_err() {
                    break;
                }
            }
        });

        client_side
    }
}

#[cfg(test)]
mod tests {
    use super::testing::fake_server;
    use super::*;

    #[tokio::test]
    async fn test_handshake_and_list_tools() {
        let client = McpClient::connect("fake", fake_server(), MCP_CLIENT_TIMEOUT).await.unwrap();
        assert_eq!(client.server_info().server_info.name, "fake");

        let tools = client.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "fail"]);
        assert_eq!(tools[1].input_schema["type"], "object");
    }

    #[tokio::test]
    async fn test_call_tool_text_and_error_flag() {
        let client = McpClient::connect("fake", fake_server(), MCP_CLIENT_TIMEOUT).await.unwrap();

        let echoed = client.call_tool("echo", json!({"text": "hi"})).await.unwrap();
        assert!(!echoed.is_error);
        assert_eq!(echoed.text(), "hi\ndone");

        let failed = client.call_tool("fail", json!({})).await.unwrap();
        assert!(failed.is_error);
        assert_eq!(failed.text(), "boom");
    }

    #[tokio::test]
    async fn test_rpc_error_is_returned() {
        let client = McpClient::connect("fake", fake_server(), MCP_CLIENT_TIMEOUT).await.unwrap();
        let err = client.call_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: error_codes::INVALID_PARAMS, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_routed() {
        let client = McpClient::connect("fake", fake_server(), MCP_CLIENT_TIMEOUT).await.unwrap();
        let (a, b) = tokio::join!(
            client.call_tool("echo", json!({"text": "a"})),
            client.call_tool("echo", json!({"text": "b"})),
        );
        assert_eq!(a.unwrap().text(), "a\ndone");
        assert_eq!(b.unwrap().text(), "b\ndone");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let client = McpClient::connect("fake", fake_server(), Duration::from_secs(5)).await.unwrap();
        let err = client.call_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { ref method, .. } if method == "tools/call"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_releases_its_waiter() {
        let client = McpClient::connect("fake", fake_server(), MCP_CLIENT_TIMEOUT).await.unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(10), client.call_tool("slow", json!({}))).await;
        assert!(abandoned.is_err());
        assert_eq!(client.pending_requests(), 0);

        let echoed = client.call_tool("echo", json!({"text": "still here"})).await.unwrap();
        assert_eq!(echoed.text(), "still here\ndone");
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_request_releases_its_waiter() {
        let client = McpClient::connect("fake", fake_server(), Duration::from_secs(5)).await.unwrap();
        assert!(client.call_tool("slow", json!({})).await.is_err());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_server_going_away_fails_requests() {
        let (client_side, server_side) = McpTransport::pair();
        let (mut sender, mut receiver, _) = server_side.into_parts();
        tokio::spawn(async move {
            // Answer the handshake, then hang up.
            let line = receiver.receive().await.unwrap().unwrap();
            let Ok(IncomingMessage::Request(req)) = IncomingMessage::parse(&line) else {
                panic!("expected initialize");
            };
            let reply = JsonRpcResponse::success(
                req.id,
                json!({"protocolVersion": PROTOCOL_VERSION, "serverInfo": {"name": "brief"}}),
            );
            sender.send(&serde_json::to_string(&reply).unwrap()).await.unwrap();
            let _ = receiver.receive().await;
        });

        let client = McpClient::connect("brief", client_side, MCP_CLIENT_TIMEOUT).await.unwrap();
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::ServerUnavailable(_) | McpError::Transport(_)));
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let client = McpClient::connect("fake", fake_server(), MCP_CLIENT_TIMEOUT).await.unwrap();
        client.close().await.unwrap();
        assert!(matches!(client.list_tools().await, Err(McpError::ServerUnavailable(_))));
    }
}
