//! HTTP server for MCP over the SSE transport.
//!
//! `GET /sse` opens a session and streams its responses as `message`
//! events, after a first `endpoint` event naming the session's POST URL.
//! `POST /messages/?session_id=<id>` feeds one JSON-RPC message to that
//! session and is acknowledged with `202 Accepted`.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mcp::codec;
use crate::mcp::protocol::Message;
use crate::mcp::server::McpServer;

/// Messages buffered per session in each direction.
const SESSION_QUEUE: usize = 100;

/// Upper bound on requests being handled at once.
const MAX_CONCURRENT_REQUESTS: usize = 256;

type Sessions = Arc<DashMap<Uuid, mpsc::Sender<Message>>>;

/// HTTP server state.
#[derive(Clone)]
pub struct HttpState {
    server: Arc<McpServer>,
    sessions: Sessions,
}

impl HttpState {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Build the router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/sse", get(open_session))
        .route("/messages/", post(post_message))
        .route("/messages", post(post_message))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .with_state(state)
}

/// Serve on an already bound listener until the process stops.
pub async fn serve(listener: TcpListener, server: Arc<McpServer>) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(
        "Serving {} over SSE at http://{}/sse ({} tools)",
        server.info().name,
        addr,
        server.tool_count()
    );
    axum::serve(listener, router(HttpState::new(server))).await?;
    Ok(())
}

/// Bind `host:port` and serve.
pub async fn start_server(host: &str, port: u16, server: Arc<McpServer>) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::HttpServer(format!("failed to bind {}: {}", addr, e)))?;
    serve(listener, server).await
}

/// Removes its session when the event stream is dropped.
struct SessionGuard {
    id: Uuid,
    sessions: Sessions,
    server: Arc<McpServer>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sessions.remove(&self.id).is_some() {
            self.server.metrics().session_closed();
            info!("Session {} closed", self.id.simple());
        }
    }
}

/// `GET /sse`
async fn open_session(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let id = Uuid::new_v4();
    let (inbox_tx, mut inbox_rx) = mpsc::channel::<Message>(SESSION_QUEUE);
    let (outbox_tx, outbox_rx) = mpsc::channel::<Event>(SESSION_QUEUE);

    state.sessions.insert(id, inbox_tx);
    state.server.metrics().session_opened();
    info!("Session {} opened", id.simple());

    // One worker per session; messages are handled in arrival order.
    let mut session = state.server.session();
    tokio::spawn(async move {
        while let Some(message) = inbox_rx.recv().await {
            let Some(response) = session.handle(message).await else {
                continue;
            };
            let data = match codec::encode(&Message::Response(response)) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to encode response: {}", e);
                    continue;
                }
            };
            if outbox_tx.send(Event::default().event("message").data(data)).await.is_err() {
                break;
            }
        }
        debug!("Session {} worker stopped", id.simple());
    });

    let guard = SessionGuard {
        id,
        sessions: state.sessions.clone(),
        server: state.server.clone(),
    };
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages/?session_id={}", id.simple()));

    let events = stream::once(async move { endpoint })
        .chain(ReceiverStream::new(outbox_rx))
        .map(move |event| {
            let _alive = &guard;
            Ok(event)
        });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: Option<String>,
}

/// `POST /messages/?session_id=<id>`
async fn post_message(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(raw_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "session_id is required").into_response();
    };
    let Ok(id) = Uuid::parse_str(&raw_id) else {
        return (StatusCode::BAD_REQUEST, "Invalid session ID").into_response();
    };
    let Some(inbox) = state.sessions.get(&id).map(|s| s.value().clone()) else {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };

    let message = match std::str::from_utf8(&body)
        .map_err(|e| Error::Protocol(e.to_string()))
        .and_then(codec::decode)
    {
        Ok(message) => message,
        Err(e) => {
            debug!("Rejecting message for session {}: {}", id.simple(), e);
            return (StatusCode::BAD_REQUEST, "Could not parse message").into_response();
        }
    };

    if inbox.send(message).await.is_err() {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

/// Health check endpoint.
async fn health_check(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "server": state.server.info().name,
        "version": crate::VERSION,
        "tools": state.server.tool_count(),
        "sessions": state.session_count(),
    }))
}

/// Prometheus metrics endpoint.
async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.server.metrics().to_prometheus(),
    )
}
