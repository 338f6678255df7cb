//! Model Context Protocol (MCP) implementation.
//!
//! # Architecture
//!
//! - `protocol` - JSON-RPC and MCP message definitions
//! - `codec` - newline-delimited JSON and SSE framing
//! - `handler` - the `ToolHandler` trait and result helpers
//! - `registry` - named tools in registration order
//! - `dispatcher` - validates and runs `tools/call`
//! - `server` - per-connection sessions
//! - `transport` - stream transports (stdio)

pub mod codec;
pub mod dispatcher;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use handler::{Arguments, ToolHandler};
pub use protocol::*;
pub use registry::ToolRegistry;
pub use server::{McpServer, ServerSession};
pub use transport::{StdioTransport, StreamTransport, Transport};
