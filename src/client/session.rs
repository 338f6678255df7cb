//! Client-side session negotiation.
//!
//! [`Negotiator`] is a pure state machine: it never touches I/O. The client
//! driver feeds it transport events and sends whatever messages it hands
//! back. Requests submitted before the handshake completes are held and
//! released, in submission order, right after the initialize ack.

use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mcp::protocol::{
    Implementation, InitializeParams, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    Message, RequestId,
};

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    /// Waiting for the server to announce where to POST.
    AwaitingEndpoint,
    /// `initialize` sent, waiting for its ack.
    Initializing,
    Ready,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

/// What the driver should do after a response was fed in.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// Hand the response to whoever waits on its id.
    Deliver(JsonRpcResponse),
    /// Handshake finished; send these messages in order.
    Ready(Vec<Message>),
}

/// Handshake and request-queue state for one session.
#[derive(Debug)]
pub struct Negotiator {
    state: SessionState,
    client_info: Implementation,
    next_id: i64,
    init_id: Option<RequestId>,
    endpoint_url: Option<String>,
    server_result: Option<Value>,
    queue: VecDeque<JsonRpcRequest>,
}

impl Negotiator {
    pub fn new(client_info: Implementation) -> Self {
        Self {
            state: SessionState::Unconnected,
            client_info,
            next_id: 0,
            init_id: None,
            endpoint_url: None,
            server_result: None,
            queue: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// POST target announced by the server, once known.
    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    /// The server's `initialize` result, once the session is ready.
    pub fn server_result(&self) -> Option<&Value> {
        self.server_result.as_ref()
    }

    /// Number of requests held back until the handshake completes.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The transport is open.
    ///
    /// Stream transports start the handshake immediately and get the
    /// `initialize` request back; endpoint-based transports wait for
    /// [`Negotiator::on_endpoint`].
    pub fn open(&mut self, needs_endpoint: bool) -> Result<Option<Message>> {
        if self.state != SessionState::Unconnected {
            return Err(Error::Protocol(format!(
                "cannot open session in state {:?}",
                self.state
            )));
        }
        if needs_endpoint {
            self.state = SessionState::AwaitingEndpoint;
            Ok(None)
        } else {
            Ok(Some(self.begin_initialize()?))
        }
    }

    /// The server announced its POST endpoint.
    ///
    /// Only the first announcement counts; repeats are ignored.
    pub fn on_endpoint(&mut self, url: String) -> Result<Option<Message>> {
        if self.state != SessionState::AwaitingEndpoint {
            warn!("Ignoring endpoint event in state {:?}: {}", self.state, url);
            return Ok(None);
        }
        info!("Session endpoint: {}", url);
        self.endpoint_url = Some(url);
        Ok(Some(self.begin_initialize()?))
    }

    /// Assign an id to a caller's request.
    ///
    /// Returns the message to send right away when the session is ready;
    /// otherwise the request is queued and `None` is returned.
    pub fn submit(
        &mut self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<(RequestId, Option<Message>)> {
        match self.state {
            SessionState::Failed => {
                return Err(Error::Connection("session failed".to_string()))
            }
            SessionState::Closed => {
                return Err(Error::TransportClosed("session closed".to_string()))
            }
            _ => {}
        }

        let request = JsonRpcRequest::new(self.next_id(), method, params);
        let id = request.id.clone();
        if self.state == SessionState::Ready {
            Ok((id, Some(Message::Request(request))))
        } else {
            debug!("Queueing {} (id: {}) until session is ready", request.method, id);
            self.queue.push_back(request);
            Ok((id, None))
        }
    }

    /// Feed a response from the server.
    ///
    /// The initialize ack is recognised by the id given to the initialize
    /// call, never by the shape of its payload.
    pub fn on_response(&mut self, response: JsonRpcResponse) -> Result<Step> {
        let is_init_ack = self.state == SessionState::Initializing
            && self.init_id.as_ref() == Some(&response.id);
        if !is_init_ack {
            return Ok(Step::Deliver(response));
        }

        match response.into_outcome() {
            Err(error) => {
                self.state = SessionState::Failed;
                Err(Error::Protocol(format!(
                    "initialize rejected ({}): {}",
                    error.code, error.message
                )))
            }
            Ok(result) if result.get("capabilities").is_some() => {
                self.state = SessionState::Ready;
                self.server_result = Some(result);
                info!("Session ready, releasing {} queued request(s)", self.queue.len());

                let mut out = Vec::with_capacity(self.queue.len() + 1);
                out.push(Message::Notification(JsonRpcNotification::new(
                    "notifications/initialized",
                    None,
                )));
                out.extend(self.queue.drain(..).map(Message::Request));
                Ok(Step::Ready(out))
            }
            Ok(_) => {
                self.state = SessionState::Failed;
                Err(Error::Protocol(
                    "initialize result has no capabilities".to_string(),
                ))
            }
        }
    }

    /// Drop a request that is still queued. Returns `false` once it has been
    /// released to the transport.
    pub fn cancel(&mut self, id: &RequestId) -> bool {
        match self.queue.iter().position(|r| &r.id == id) {
            Some(index) => {
                self.queue.remove(index);
                debug!("Cancelled queued request (id: {})", id);
                true
            }
            None => false,
        }
    }

    /// Mark the session failed. Returns the ids that were still queued.
    pub fn fail(&mut self) -> Vec<RequestId> {
        self.state = SessionState::Failed;
        self.queue.drain(..).map(|r| r.id).collect()
    }

    /// Mark the session closed. Returns the ids that were still queued.
    pub fn close(&mut self) -> Vec<RequestId> {
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
        self.queue.drain(..).map(|r| r.id).collect()
    }

    fn begin_initialize(&mut self) -> Result<Message> {
        let params = InitializeParams::for_client(
            self.client_info.name.clone(),
            self.client_info.version.clone(),
        );
        let request = JsonRpcRequest::new(
            self.next_id(),
            "initialize",
            Some(serde_json::to_value(params)?),
        );
        self.init_id = Some(request.id.clone());
        self.state = SessionState::Initializing;
        Ok(Message::Request(request))
    }

    fn next_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId::Number(self.next_id)
    }
}
