//! MCP Toolbox
//!
//! Small Model Context Protocol (MCP) tool servers and a matching client.
//!
//! # Architecture
//!
//! The crate is split into layers:
//!
//! 1. **MCP Layer** (`mcp`) - JSON-RPC types, line framing, registry, dispatcher, server sessions
//! 2. **Client Layer** (`client`) - session negotiator and `McpClient` over stdio or SSE
//! 3. **HTTP Layer** (`http`) - SSE endpoint plus POST side channel for remote sessions
//! 4. **Service Layer** (`service`) - weather lookups, CSV ledger, quotes, document index
//! 5. **Tools Layer** (`tools`) - the MCP tools each server exposes
//!
//! # Servers
//!
//! - **weather**: `get_weather`, `get_forecast`
//! - **stocks**: cash ledger, portfolio and quote tools
//! - **documents**: `document_search`

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod metrics;
pub mod service;
pub mod tools;

pub use error::{Error, Result};

/// Crate version, reported in `serverInfo` and `clientInfo`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
