//! Configuration management for the tool servers.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::service::documents::DEFAULT_TOP_K;
use crate::service::ledger::DEFAULT_INITIAL_BALANCE;
use crate::service::quote::DEFAULT_QUOTE_URL;

/// Default timeout for outbound HTTP calls.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// File name of the document index inside the data directory.
pub const INDEX_FILE: &str = "documents_index.json";

/// Command-line arguments for the tool server.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-toolbox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP tool servers for weather, a stock ledger and document search")]
pub struct Args {
    /// Which tool server to run
    #[arg(short, long, value_enum, env = "MCP_TOOLBOX_SERVER")]
    pub server: ServerKind,

    /// Transport mode: stdio or sse
    #[arg(short, long, default_value = "stdio", env = "MCP_TOOLBOX_TRANSPORT")]
    pub transport: Transport,

    /// Bind address (only for sse transport)
    #[arg(long, default_value = "127.0.0.1", env = "MCP_TOOLBOX_HOST")]
    pub host: String,

    /// HTTP port (only for sse transport, default depends on the server)
    #[arg(short, long, env = "MCP_TOOLBOX_PORT")]
    pub port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long, env = "MCP_TOOLBOX_DEBUG")]
    pub debug: bool,

    /// Directory holding the ledger CSV files and the document index
    #[arg(long, env = "MCP_TOOLBOX_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Opening balance written when the balance file does not exist
    #[arg(long, default_value_t = DEFAULT_INITIAL_BALANCE, env = "MCP_TOOLBOX_INITIAL_BALANCE")]
    pub initial_balance: f64,

    /// Document index file (defaults to <data-dir>/documents_index.json)
    #[arg(long, env = "MCP_TOOLBOX_INDEX_PATH")]
    pub index_path: Option<PathBuf>,

    /// Ingest .txt/.md files from this directory before serving
    #[arg(long, env = "MCP_TOOLBOX_INGEST")]
    pub ingest: Option<PathBuf>,

    /// Number of chunks returned by document_search
    #[arg(long, default_value_t = DEFAULT_TOP_K, env = "MCP_TOOLBOX_TOP_K")]
    pub top_k: usize,

    /// Timeout for outbound HTTP calls, in seconds
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT_SECS, env = "MCP_TOOLBOX_HTTP_TIMEOUT_SECS")]
    pub http_timeout_secs: u64,

    /// Base URL of the finance quote pages
    #[arg(long, default_value = DEFAULT_QUOTE_URL, env = "MCP_TOOLBOX_QUOTE_URL")]
    pub quote_url: String,

    /// Base URL serving /v1/search, /v1/archive and /v1/forecast (defaults to Open-Meteo)
    #[arg(long, env = "MCP_TOOLBOX_WEATHER_URL")]
    pub weather_url: Option<String>,
}

/// Which set of tools a process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Weather,
    Stocks,
    Documents,
}

impl ServerKind {
    /// Name reported in `serverInfo`.
    pub fn server_name(self) -> &'static str {
        match self {
            ServerKind::Weather => "weather-mcp",
            ServerKind::Stocks => "stock-trading-mcp",
            ServerKind::Documents => "document-search-mcp",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ServerKind::Weather => 8010,
            ServerKind::Stocks => 8020,
            ServerKind::Documents => 8000,
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.server_name())
    }
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Sse,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerKind,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub debug: bool,
    /// Ledger files live here
    pub data_dir: PathBuf,
    pub initial_balance: f64,
    pub index_path: PathBuf,
    /// Directory ingested into the index at startup
    pub ingest_dir: Option<PathBuf>,
    pub top_k: usize,
    pub http_timeout_secs: u64,
    pub quote_base_url: String,
    /// `None` means the public Open-Meteo hosts
    pub weather_base_url: Option<String>,
}

/// `$XDG_DATA_HOME/mcp-toolbox` or the platform equivalent, falling back to
/// the temp directory when no data directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mcp-toolbox")
}

impl Config {
    /// Defaults for one server kind.
    pub fn for_server(server: ServerKind) -> Self {
        let data_dir = default_data_dir();
        Self {
            server,
            transport: Transport::Stdio,
            host: "127.0.0.1".to_string(),
            port: server.default_port(),
            debug: false,
            index_path: data_dir.join(INDEX_FILE),
            data_dir,
            initial_balance: DEFAULT_INITIAL_BALANCE,
            ingest_dir: None,
            top_k: DEFAULT_TOP_K,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            quote_base_url: DEFAULT_QUOTE_URL.to_string(),
            weather_base_url: None,
        }
    }

    /// `host:port` for the SSE listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
        Self {
            server: args.server,
            transport: args.transport,
            host: args.host,
            port: args.port.unwrap_or_else(|| args.server.default_port()),
            debug: args.debug,
            index_path: args
                .index_path
                .unwrap_or_else(|| data_dir.join(INDEX_FILE)),
            data_dir,
            initial_balance: args.initial_balance,
            ingest_dir: args.ingest,
            top_k: args.top_k,
            http_timeout_secs: args.http_timeout_secs,
            quote_base_url: args.quote_url,
            weather_base_url: args.weather_url,
        }
    }
}
