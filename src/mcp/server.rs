//! MCP server implementation.
//!
//! [`McpServer`] is the shared, immutable part of a tool server. Each
//! connection gets its own [`ServerSession`] carrying the handshake state.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::mcp::dispatcher::Dispatcher;
use crate::mcp::protocol::*;
use crate::mcp::registry::ToolRegistry;
use crate::mcp::transport::Transport;
use crate::metrics::Metrics;
use crate::VERSION;

/// MCP server.
pub struct McpServer {
    dispatcher: Dispatcher,
    info: ServerInfo,
    metrics: Arc<Metrics>,
}

impl McpServer {
    /// Create a new MCP server.
    pub fn new(registry: ToolRegistry, name: impl Into<String>) -> Self {
        Self::with_metrics(registry, name, Metrics::new())
    }

    /// Create a server that reports into an existing metrics collector.
    pub fn with_metrics(
        registry: ToolRegistry,
        name: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::new(registry), metrics.clone()),
            info: ServerInfo {
                name: name.into(),
                version: VERSION.to_string(),
            },
            metrics,
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn tool_count(&self) -> usize {
        self.dispatcher.registry().len()
    }

    /// Open a new session against this server.
    pub fn session(self: &Arc<Self>) -> ServerSession {
        ServerSession {
            server: self.clone(),
            initialized: false,
        }
    }

    /// Run one session over the given transport until its input ends.
    pub async fn run<T: Transport>(self: &Arc<Self>, mut transport: T) -> Result<()> {
        info!("Starting MCP server: {} v{}", self.info.name, self.info.version);

        let (mut incoming, outgoing) = transport.start().await?;
        let mut session = self.session();

        while let Some(msg) = incoming.recv().await {
            if let Some(response) = session.handle(msg).await {
                if outgoing.send(Message::Response(response)).await.is_err() {
                    error!("Failed to send response");
                    break;
                }
            }
        }

        drop(session);
        drop(outgoing);
        transport.stop().await?;
        info!("MCP server stopped");
        Ok(())
    }

    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                logging: None,
            },
            server_info: self.info.clone(),
        }
    }
}

/// Per-connection state: whether the handshake has happened.
pub struct ServerSession {
    server: Arc<McpServer>,
    initialized: bool,
}

impl ServerSession {
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Handle one inbound message. Only requests produce a response.
    pub async fn handle(&mut self, message: Message) -> Option<JsonRpcResponse> {
        match message {
            Message::Request(req) => Some(self.handle_request(req).await),
            Message::Notification(notif) => {
                self.handle_notification(notif);
                None
            }
            Message::Response(res) => {
                warn!("Received unexpected response (id: {})", res.id);
                None
            }
        }
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Handling request: {} (id: {})", req.method, req.id);
        let metrics = self.server.metrics.clone();
        metrics.inc_requests();

        let response = match req.method.as_str() {
            "initialize" => {
                let result = self.handle_initialize(req.params);
                respond(req.id, result)
            }
            "ping" => JsonRpcResponse::success(req.id, serde_json::json!({})),
            _ if !self.initialized => JsonRpcResponse::failure(
                req.id,
                error_codes::INVALID_REQUEST,
                "Session not initialized",
            ),
            "tools/list" => {
                let result = ListToolsResult {
                    tools: self.server.dispatcher.registry().list(),
                };
                respond(req.id, serde_json::to_value(result).map_err(Error::from))
            }
            "tools/call" => self.server.dispatcher.dispatch(req.id, req.params).await,
            _ => JsonRpcResponse::failure(
                req.id,
                error_codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", req.method),
            ),
        };

        if response.is_error() {
            metrics.inc_failed();
        }
        response
    }

    /// Handle initialize request.
    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = params
            .ok_or_else(|| Error::InvalidToolArguments("Missing params".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| Error::InvalidToolArguments(e.to_string()))
            })?;

        if params.protocol_version != MCP_VERSION {
            info!(
                "Client requested protocol {}, answering with {}",
                params.protocol_version, MCP_VERSION
            );
        }
        info!(
            "Initializing session for {} v{}",
            params.client_info.name, params.client_info.version
        );

        self.initialized = true;
        Ok(serde_json::to_value(self.server.initialize_result())?)
    }

    /// Handle a notification.
    fn handle_notification(&mut self, notif: JsonRpcNotification) {
        debug!("Handling notification: {}", notif.method);

        match notif.method.as_str() {
            "notifications/initialized" => info!("Client initialized"),
            "notifications/cancelled" => {
                debug!("Ignoring cancellation; requests run to completion")
            }
            _ => debug!("Unknown notification: {}", notif.method),
        }
    }
}

fn respond(id: RequestId, result: Result<Value>) -> JsonRpcResponse {
    match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::from_error(id, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::success_result;
    use crate::mcp::transport::StreamTransport;
    use futures::FutureExt;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn server() -> Arc<McpServer> {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                "list_stocks",
                "List portfolio positions",
                json!({"type": "object", "properties": {}}),
                |_args| async { Ok(success_result("[]")) }.boxed(),
            )
            .unwrap();
        Arc::new(McpServer::new(registry, "stock-trading-mcp"))
    }

    fn request(id: i64, method: &str, params: Value) -> Message {
        Message::Request(JsonRpcRequest::new(RequestId::Number(id), method, Some(params)))
    }

    fn init_params() -> Value {
        json!({
            "protocolVersion": MCP_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        })
    }

    #[tokio::test]
    async fn test_requests_before_initialize_are_rejected() {
        let server = server();
        let mut session = server.session();

        let response = session.handle(request(1, "tools/list", json!({}))).await.unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_REQUEST);

        // ping is always allowed
        let response = session.handle(request(2, "ping", json!({}))).await.unwrap();
        assert!(!response.is_error());
        assert!(!session.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_then_list_tools() {
        let server = server();
        let mut session = server.session();

        let response = session.handle(request(1, "initialize", init_params())).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], json!(MCP_VERSION));
        assert!(result["capabilities"].is_object());
        assert_eq!(result["serverInfo"]["name"], json!("stock-trading-mcp"));
        assert!(session.is_initialized());

        let response = session.handle(request(2, "tools/list", json!({}))).await.unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], json!("list_stocks"));
        assert_eq!(tools[0]["inputSchema"], json!({"type": "object", "properties": {}}));
    }

    #[tokio::test]
    async fn test_malformed_initialize() {
        let server = server();
        let mut session = server.session();

        let response = session
            .handle(request(1, "initialize", json!({"protocolVersion": 5})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
        assert!(!session.is_initialized());
    }

    #[tokio::test]
    async fn test_unknown_method_and_non_requests() {
        let server = server();
        let mut session = server.session();
        session.handle(request(1, "initialize", init_params())).await;

        let response = session.handle(request(2, "resources/list", json!({}))).await.unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        let notif = Message::Notification(JsonRpcNotification::new("notifications/initialized", None));
        assert!(session.handle(notif).await.is_none());

        let stray = Message::Response(JsonRpcResponse::success(RequestId::Number(9), json!({})));
        assert!(session.handle(stray).await.is_none());

        let snapshot = server.metrics().snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_failed, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let server = server();
        let mut first = server.session();
        let mut second = server.session();

        first.handle(request(1, "initialize", init_params())).await;
        assert!(first.is_initialized());
        assert!(!second.is_initialized());

        let response = second.handle(request(1, "tools/list", json!({}))).await.unwrap();
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn test_run_over_stream() {
        let server = server();
        let (client, server_end) = tokio::io::duplex(8192);
        let (server_read, server_write) = tokio::io::split(server_end);

        let running = {
            let server = server.clone();
            tokio::spawn(async move {
                server
                    .run(StreamTransport::new(server_read, server_write))
                    .await
            })
        };

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut lines = BufReader::new(client_read).lines();

        let init = format!(
            "{}\n",
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": init_params()})
        );
        client_write.write_all(init.as_bytes()).await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["id"], json!(1));

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
            .await
            .unwrap();
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",\"params\":{\"name\":\"nope\"}}\n")
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["id"], json!(2));
        assert_eq!(reply["error"]["message"], json!("Unknown tool 'nope'"));

        client_write.shutdown().await.unwrap();
        drop(client_write);
        running.await.unwrap().unwrap();
    }
}
