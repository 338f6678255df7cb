//! Client transport over a child process's stdin/stdout.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::{ClientTransport, TransportEvent};
use crate::error::{Error, Result};
use crate::mcp::codec::JsonLineCodec;
use crate::mcp::protocol::Message;

const GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Spawns an MCP server and talks to it over its standard streams.
///
/// The child's stderr is inherited so its logs stay visible. The child is
/// killed when the transport is closed or dropped.
pub struct StdioClientTransport {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    child: Mutex<Option<Child>>,
    writer: Mutex<Option<FramedWrite<ChildStdin, JsonLineCodec>>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StdioClientTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
            child: Mutex::new(None),
            writer: Mutex::new(None),
            reader: std::sync::Mutex::new(None),
        }
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl ClientTransport for StdioClientTransport {
    fn needs_endpoint(&self) -> bool {
        false
    }

    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Connection(format!("failed to spawn {}: {}", self.program, e)))?;
        info!("Spawned MCP server: {} {:?}", self.program, self.args);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Connection("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Connection("child stdout not captured".to_string()))?;

        let (tx, rx) = mpsc::channel(100);
        let reader = tokio::spawn(async move {
            let mut frames = FramedRead::new(stdout, JsonLineCodec::new());
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(message) => {
                        if tx.send(TransportEvent::Message(message)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Closed(e.to_string())).await;
                        return;
                    }
                }
            }
            debug!("Server stdout closed");
            let _ = tx
                .send(TransportEvent::Closed("server process exited".to_string()))
                .await;
        });

        *self.writer.lock().await = Some(FramedWrite::new(stdin, JsonLineCodec::new()));
        *self.child.lock().await = Some(child);
        if let Ok(mut slot) = self.reader.lock() {
            *slot = Some(reader);
        }
        Ok(rx)
    }

    async fn send(&self, message: Message) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| Error::TransportClosed("server stdin is closed".to_string()))?;
        sink.send(message).await.map_err(|e| match e {
            Error::Io(io) => Error::TransportClosed(format!("write to server failed: {}", io)),
            other => other,
        })
    }

    async fn close(&self) -> Result<()> {
        // EOF on stdin asks the server to exit on its own.
        self.writer.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(GRACE_PERIOD, child.wait()).await {
                Ok(Ok(status)) => debug!("Server exited: {}", status),
                Ok(Err(e)) => warn!("Failed to wait for server: {}", e),
                Err(_) => {
                    warn!("Server did not exit, killing it");
                    child.kill().await?;
                }
            }
        }

        if let Ok(mut slot) = self.reader.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        Ok(())
    }
}
