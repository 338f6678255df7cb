//! Server-side transport layer.
//!
//! A transport turns a byte channel into a pair of message queues. The
//! stdio transport is a [`StreamTransport`] over the process's standard
//! streams; the SSE transport lives in [`crate::http`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::mcp::codec::JsonLineCodec;
use crate::mcp::protocol::Message;

/// Capacity of the inbound and outbound queues.
const CHANNEL_CAPACITY: usize = 100;

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send {
    /// Start the transport, returning channels for messages.
    async fn start(&mut self) -> Result<(mpsc::Receiver<Message>, mpsc::Sender<Message>)>;

    /// Stop the transport.
    ///
    /// Messages already queued on the outbound sender are written before
    /// this returns, provided every sender clone has been dropped.
    async fn stop(&mut self) -> Result<()>;
}

/// Newline-delimited JSON over any async reader/writer pair.
pub struct StreamTransport<R, W> {
    reader: Option<R>,
    writer: Option<W>,
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
}

/// Stdio transport for MCP.
pub type StdioTransport = StreamTransport<Stdin, Stdout>;

impl StreamTransport<Stdin, Stdout> {
    /// Transport over this process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
            read_task: None,
            write_task: None,
        }
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&mut self) -> Result<(mpsc::Receiver<Message>, mpsc::Sender<Message>)> {
        let (reader, writer) = match (self.reader.take(), self.writer.take()) {
            (Some(r), Some(w)) => (r, w),
            _ => return Err(Error::Internal("transport already started".to_string())),
        };

        // Channel for incoming messages (from the reader)
        let (incoming_tx, incoming_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        // Channel for outgoing messages (to the writer)
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);

        self.read_task = Some(tokio::spawn(async move {
            let mut frames = FramedRead::new(reader, JsonLineCodec::new());
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(message) => {
                        if incoming_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error reading input stream: {}", e);
                        break;
                    }
                }
            }
            debug!("EOF on input stream, stopping transport");
        }));

        self.write_task = Some(tokio::spawn(async move {
            let mut sink = FramedWrite::new(writer, JsonLineCodec::new());
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    error!("Error writing output stream: {}", e);
                    break;
                }
            }
        }));

        Ok((incoming_rx, outgoing_tx))
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        if let Some(task) = self.write_task.take() {
            task.await
                .map_err(|e| Error::Internal(format!("writer task failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcResponse, RequestId};
    use serde_json::json;

    #[tokio::test]
    async fn test_reads_messages_and_skips_noise() {
        let input = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .read(b"this is not json\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
            .build();
        let output = tokio_test::io::Builder::new().build();

        let mut transport = StreamTransport::new(input, output);
        let (mut incoming, outgoing) = transport.start().await.unwrap();

        assert!(matches!(incoming.recv().await, Some(Message::Request(_))));
        assert!(matches!(incoming.recv().await, Some(Message::Notification(_))));
        assert!(incoming.recv().await.is_none());

        drop(outgoing);
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_one_line_per_message() {
        let input = tokio_test::io::Builder::new().build();
        let output = tokio_test::io::Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n")
            .build();

        let mut transport = StreamTransport::new(input, output);
        let (_incoming, outgoing) = transport.start().await.unwrap();
        outgoing
            .send(Message::Response(JsonRpcResponse::success(
                RequestId::Number(1),
                json!({}),
            )))
            .await
            .unwrap();

        drop(outgoing);
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (a, b) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(a, b);
        let _channels = transport.start().await.unwrap();
        assert!(transport.start().await.is_err());
    }
}
