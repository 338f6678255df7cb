//! Error types for the MCP toolbox.

use std::path::PathBuf;

use thiserror::Error;

use crate::mcp::protocol::error_codes;

/// Result type alias for toolbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the toolbox.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Session / Transport Errors =====
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout: operation timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("HTTP {status} {status_text}: {message}")]
    Api {
        status: u16,
        status_text: String,
        message: String,
    },

    // ===== Registry / Dispatch Errors =====
    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Missing required argument(s): {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    #[error("Tool execution failed: {0}")]
    Handler(String),

    #[error("Remote error ({code}): {message}")]
    Rpc { code: i32, message: String },

    // ===== Service Errors =====
    #[error("Ledger file {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed ledger file {}: {message}", path.display())]
    LedgerFormat { path: PathBuf, message: String },

    #[error("Document index {}: {message}", path.display())]
    Index { path: PathBuf, message: String },

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // ===== HTTP Errors =====
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP server error: {0}")]
    HttpServer(String),

    // ===== Internal Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an API error from HTTP response details.
    pub fn api(status: u16, status_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            status_text: status_text.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O failure on a ledger file so the message names the file.
    pub fn ledger(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Ledger {
            path: path.into(),
            source,
        }
    }

    /// True for failures of the channel itself rather than of a tool.
    ///
    /// Callers use this to tell a dead session apart from a tool that
    /// reported an error over a healthy one.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Timeout { .. }
                | Self::TransportClosed(_)
                | Self::Api { .. }
                | Self::Http(_)
        )
    }

    /// JSON-RPC error code used when this error is reported to a peer.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::UnknownTool(_) | Self::Validation(_) | Self::InvalidToolArguments(_) => {
                error_codes::INVALID_PARAMS
            }
            Self::Protocol(_) => error_codes::INVALID_REQUEST,
            Self::Rpc { code, .. } => *code,
            _ => error_codes::INTERNAL_ERROR,
        }
    }
}
