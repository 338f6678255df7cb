//! Client transport over Server-Sent Events plus HTTP POST.
//!
//! Server-to-client traffic arrives on one long-lived `GET {base}/sse`
//! stream. The first `endpoint` event names the URL that client messages
//! are POSTed to; the POST status only acknowledges delivery, replies come
//! back on the event stream.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Client;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::{ClientTransport, TransportEvent};
use crate::error::{Error, Result};
use crate::mcp::codec::{self, SseDecoder};
use crate::mcp::protocol::Message;

const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SSE client transport.
pub struct SseClientTransport {
    http: Client,
    base_url: String,
    post_timeout: Duration,
    endpoint: Arc<OnceLock<String>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SseClientTransport {
    /// Create a transport for a server at `base_url`.
    ///
    /// A trailing `/sse` is accepted and stripped, so both
    /// `http://host:8010` and `http://host:8010/sse` work.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/');
        let base_url = base_url.strip_suffix("/sse").unwrap_or(base_url).to_string();

        Ok(Self {
            http,
            base_url,
            post_timeout: DEFAULT_POST_TIMEOUT,
            endpoint: Arc::new(OnceLock::new()),
            reader: std::sync::Mutex::new(None),
        })
    }

    /// Bound on each POST.
    pub fn with_post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The announced POST endpoint, once received.
    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint.get().map(String::as_str)
    }
}

/// Turn an `endpoint` event payload into an absolute URL.
pub fn resolve_endpoint(base_url: &str, payload: &str) -> String {
    let payload = payload.trim();
    if payload.starts_with("http://") || payload.starts_with("https://") {
        payload.to_string()
    } else if payload.starts_with('/') {
        format!("{}{}", base_url, payload)
    } else {
        format!("{}/{}", base_url, payload)
    }
}

#[async_trait]
impl ClientTransport for SseClientTransport {
    fn needs_endpoint(&self) -> bool {
        true
    }

    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let url = format!("{}/sse", self.base_url);
        debug!("Opening event stream: {}", url);

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| Error::Connection(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connection(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        info!("Connected to {}", url);

        let body = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );
        let mut events = FramedRead::new(StreamReader::new(body), SseDecoder::new());

        let (tx, rx) = mpsc::channel(100);
        let endpoint = self.endpoint.clone();
        let base_url = self.base_url.clone();

        let reader = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Closed(e.to_string())).await;
                        return;
                    }
                };

                let forwarded = if event.is_endpoint() {
                    let url = resolve_endpoint(&base_url, &event.data);
                    if endpoint.set(url.clone()).is_ok() {
                        tx.send(TransportEvent::Endpoint(url)).await
                    } else {
                        debug!("Ignoring repeated endpoint event: {}", url);
                        Ok(())
                    }
                } else if event.is_message() {
                    match codec::decode(&event.data) {
                        Ok(message) => tx.send(TransportEvent::Message(message)).await,
                        Err(e) => {
                            warn!("Skipping undecodable event: {}", e);
                            Ok(())
                        }
                    }
                } else {
                    debug!("Ignoring event type {:?}", event.event);
                    Ok(())
                };

                if forwarded.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(TransportEvent::Closed("event stream ended".to_string()))
                .await;
        });

        if let Ok(mut slot) = self.reader.lock() {
            *slot = Some(reader);
        }
        Ok(rx)
    }

    async fn send(&self, message: Message) -> Result<()> {
        let endpoint = self
            .endpoint
            .get()
            .ok_or_else(|| Error::Connection("no endpoint announced yet".to_string()))?;
        let body = codec::encode(&message)?;

        let response = self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.post_timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        millis: self.post_timeout.as_millis() as u64,
                    }
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                text,
            ));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Dropping the body stream closes the GET connection.
        if let Ok(mut slot) = self.reader.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        Ok(())
    }
}
