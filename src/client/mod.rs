//! MCP client.
//!
//! [`McpClient`] owns one session over a [`ClientTransport`]. A driver task
//! feeds transport events into the [`Negotiator`] and routes each response
//! to the caller waiting on its id.

pub mod session;
pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::mcp::protocol::{
    error_codes, Implementation, JsonRpcRequest, JsonRpcResponse, ListToolsResult, Message,
    RequestId, Tool, ToolResult,
};
use crate::VERSION;

pub use session::{Negotiator, SessionState, Step};
pub use sse::SseClientTransport;
pub use stdio::StdioClientTransport;

/// Something a client transport observed.
#[derive(Debug)]
pub enum TransportEvent {
    /// The server announced its POST endpoint (absolute URL).
    Endpoint(String),
    Message(Message),
    /// The inbound stream ended.
    Closed(String),
}

/// Client side of a transport.
#[async_trait]
pub trait ClientTransport: Send + Sync + 'static {
    /// Whether the server must announce an endpoint before the handshake.
    fn needs_endpoint(&self) -> bool;

    /// Connect and return the stream of inbound events.
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Deliver one message to the server.
    async fn send(&self, message: Message) -> Result<()>;

    /// Release the connection. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub client_info: Implementation,
    /// Bound on the handshake, endpoint announcement included.
    pub connect_timeout: Duration,
    /// Bound on each individual request.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_info: Implementation {
                name: "mcp-toolbox-client".to_string(),
                version: VERSION.to_string(),
            },
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone)]
enum Shutdown {
    Connection(String),
    Protocol(String),
    Closed(String),
}

impl Shutdown {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::Protocol(m) => Shutdown::Protocol(m.clone()),
            Error::TransportClosed(m) => Shutdown::Closed(m.clone()),
            other => Shutdown::Connection(other.to_string()),
        }
    }

    fn to_error(&self) -> Error {
        match self {
            Shutdown::Connection(m) => Error::Connection(m.clone()),
            Shutdown::Protocol(m) => Error::Protocol(m.clone()),
            Shutdown::Closed(m) => Error::TransportClosed(m.clone()),
        }
    }
}

type Waiter = oneshot::Sender<Result<JsonRpcResponse>>;

struct Shared {
    negotiator: Mutex<Negotiator>,
    waiters: DashMap<RequestId, Waiter>,
    state: watch::Sender<SessionState>,
    shutdown: StdMutex<Option<Shutdown>>,
}

impl Shared {
    fn publish(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn shutdown_error(&self) -> Option<Error> {
        self.shutdown
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(Shutdown::to_error))
    }

    /// Stop the session and fail every pending caller.
    fn stop(&self, negotiator: &mut Negotiator, reason: Shutdown) {
        let state = match reason {
            Shutdown::Closed(_) => {
                negotiator.close();
                negotiator.state()
            }
            _ => {
                negotiator.fail();
                SessionState::Failed
            }
        };
        if let Ok(mut slot) = self.shutdown.lock() {
            slot.get_or_insert(reason.clone());
        }

        let ids: Vec<RequestId> = self.waiters.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.waiters.remove(&id) {
                let _ = waiter.send(Err(reason.to_error()));
            }
        }
        self.publish(state);
    }

    fn deliver(&self, response: JsonRpcResponse) {
        match self.waiters.remove(&response.id) {
            Some((_, waiter)) => {
                let _ = waiter.send(Ok(response));
            }
            None => warn!("Dropping response with no waiting caller (id: {})", response.id),
        }
    }
}

/// One MCP session over a client transport.
pub struct McpClient<T: ClientTransport> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    options: ClientOptions,
    driver: JoinHandle<()>,
}

impl<T: ClientTransport> McpClient<T> {
    /// Open the transport and start the handshake.
    ///
    /// Returns as soon as the transport is open; calls made before the
    /// session is ready are queued. Use [`McpClient::wait_ready`] to block on
    /// the handshake.
    pub async fn connect(transport: T, options: ClientOptions) -> Result<Self> {
        let transport = Arc::new(transport);
        let events = transport.open().await?;

        let (state, _) = watch::channel(SessionState::Unconnected);
        let shared = Arc::new(Shared {
            negotiator: Mutex::new(Negotiator::new(options.client_info.clone())),
            waiters: DashMap::new(),
            state,
            shutdown: StdMutex::new(None),
        });

        {
            let mut negotiator = shared.negotiator.lock().await;
            let first = negotiator.open(transport.needs_endpoint())?;
            if let Some(init) = first {
                transport.send(init).await?;
            }
            shared.publish(negotiator.state());
        }

        let driver = tokio::spawn(drive(
            transport.clone(),
            shared.clone(),
            events,
            options.connect_timeout,
        ));

        Ok(Self {
            transport,
            shared,
            options,
            driver,
        })
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Wait until the handshake completes or the session stops.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        let waited = tokio::time::timeout(
            self.options.connect_timeout,
            state.wait_for(|s| *s == SessionState::Ready || s.is_terminal()),
        )
        .await;

        match waited {
            Ok(Ok(s)) if *s == SessionState::Ready => Ok(()),
            Ok(_) => Err(self
                .shared
                .shutdown_error()
                .unwrap_or_else(|| Error::Connection("session failed".to_string()))),
            Err(_) => Err(Error::Connection(format!(
                "session not ready within {} ms",
                self.options.connect_timeout.as_millis()
            ))),
        }
    }

    /// The server's `initialize` result, once ready.
    pub async fn server_info(&self) -> Option<Value> {
        self.shared.negotiator.lock().await.server_result().cloned()
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse> {
        if let Some(err) = self.shared.shutdown_error() {
            return Err(err);
        }

        let (tx, rx) = oneshot::channel();
        // The waiter is registered before the lock is released so the driver
        // cannot see the response first. Sending happens outside the lock.
        let (id, now) = {
            let mut negotiator = self.shared.negotiator.lock().await;
            let (id, now) = negotiator.submit(method, params)?;
            self.shared.waiters.insert(id.clone(), tx);
            (id, now)
        };
        if let Some(message) = now {
            if let Err(e) = self.transport.send(message).await {
                self.shared.waiters.remove(&id);
                return Err(e);
            }
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(self
                .shared
                .shutdown_error()
                .unwrap_or_else(|| Error::TransportClosed("session driver stopped".to_string()))),
            Err(_) => {
                // A request still waiting for the handshake must never reach
                // the server once its caller has given up.
                self.shared.negotiator.lock().await.cancel(&id);
                self.shared.waiters.remove(&id);
                Err(Error::Timeout {
                    millis: self.options.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result = outcome(self.request("tools/list", Some(json!({}))).await?)?;
        let listed: ListToolsResult = serde_json::from_value(result)?;
        Ok(listed.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = outcome(self.request("tools/call", Some(params)).await?)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Close the session. In-flight calls fail with `TransportClosed`.
    pub async fn close(self) -> Result<()> {
        {
            let mut negotiator = self.shared.negotiator.lock().await;
            self.shared
                .stop(&mut negotiator, Shutdown::Closed("client closed".to_string()));
        }
        self.driver.abort();
        self.transport.close().await
    }
}

impl<T: ClientTransport> Drop for McpClient<T> {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn outcome(response: JsonRpcResponse) -> Result<Value> {
    response
        .into_outcome()
        .map_err(|e| Error::Rpc {
            code: e.code,
            message: e.message,
        })
}

/// Driver task: one per client.
async fn drive<T: ClientTransport>(
    transport: Arc<T>,
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<TransportEvent>,
    connect_timeout: Duration,
) {
    let deadline = Instant::now() + connect_timeout;

    loop {
        let handshaking = !matches!(
            *shared.state.borrow(),
            SessionState::Ready | SessionState::Failed | SessionState::Closed
        );
        let event = if handshaking {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    let mut negotiator = shared.negotiator.lock().await;
                    let what = if negotiator.state() == SessionState::AwaitingEndpoint {
                        "no endpoint event"
                    } else {
                        "no initialize response"
                    };
                    let reason = format!("{} within {} ms", what, connect_timeout.as_millis());
                    error!("Handshake failed: {}", reason);
                    shared.stop(&mut negotiator, Shutdown::Connection(reason));
                    return;
                }
            }
        } else {
            events.recv().await
        };

        let mut negotiator = shared.negotiator.lock().await;
        if negotiator.state().is_terminal() {
            return;
        }

        let result = match event {
            None => Err(Shutdown::Closed("transport stream ended".to_string())),
            Some(TransportEvent::Closed(reason)) => Err(Shutdown::Closed(reason)),
            Some(TransportEvent::Endpoint(url)) => match negotiator.on_endpoint(url) {
                Ok(Some(init)) => send_all(&*transport, vec![init]).await,
                Ok(None) => Ok(()),
                Err(e) => Err(Shutdown::from_error(&e)),
            },
            Some(TransportEvent::Message(Message::Response(response))) => {
                match negotiator.on_response(response) {
                    Ok(Step::Deliver(response)) => {
                        shared.deliver(response);
                        Ok(())
                    }
                    Ok(Step::Ready(out)) => send_all(&*transport, out).await,
                    Err(e) => Err(Shutdown::from_error(&e)),
                }
            }
            Some(TransportEvent::Message(Message::Request(request))) => {
                let reply = answer_server_request(request);
                send_all(&*transport, vec![Message::Response(reply)]).await
            }
            Some(TransportEvent::Message(Message::Notification(notif))) => {
                debug!("Server notification: {}", notif.method);
                Ok(())
            }
        };

        match result {
            Ok(()) => shared.publish(negotiator.state()),
            Err(reason) => {
                debug!("Session stopping: {:?}", reason);
                shared.stop(&mut negotiator, reason);
                return;
            }
        }
    }
}

async fn send_all<T: ClientTransport>(
    transport: &T,
    messages: Vec<Message>,
) -> std::result::Result<(), Shutdown> {
    for message in messages {
        transport
            .send(message)
            .await
            .map_err(|e| Shutdown::from_error(&e))?;
    }
    Ok(())
}

/// Servers may ping the client; nothing else is supported.
fn answer_server_request(request: JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "ping" => JsonRpcResponse::success(request.id, json!({})),
        other => JsonRpcResponse::failure(
            request.id,
            error_codes::METHOD_NOT_FOUND,
            format!("Unknown method: {}", other),
        ),
    }
}
