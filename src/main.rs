//! MCP Toolbox server
//!
//! Runs one of the tool servers (weather, stocks, documents) over stdio or SSE.

use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mcp_toolbox::config::{Args, Config, Transport};
use mcp_toolbox::error::{Error, Result};
use mcp_toolbox::mcp::server::McpServer;
use mcp_toolbox::mcp::transport::StdioTransport;
use mcp_toolbox::tools;
use mcp_toolbox::VERSION;

fn init_logging(debug: bool) -> Result<()> {
    // stdout carries the stdio wire, so logs go to stderr.
    let builder = FmtSubscriber::builder().with_writer(std::io::stderr);
    let result = if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )
    } else {
        let level = if debug { Level::DEBUG } else { Level::INFO };
        tracing::subscriber::set_global_default(builder.with_max_level(level).finish())
    };
    result.map_err(|e| Error::Internal(format!("failed to set tracing subscriber: {}", e)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.debug)?;

    let config: Config = args.into();

    info!("MCP Toolbox v{}", VERSION);
    info!("Server: {}", config.server);
    info!("Transport: {:?}", config.transport);

    let registry = tools::build_registry(&config).await?;
    let server = Arc::new(McpServer::new(registry, config.server.server_name()));

    let serving = async {
        match config.transport {
            Transport::Stdio => {
                info!("Starting stdio transport...");
                server.run(StdioTransport::stdio()).await
            }
            Transport::Sse => {
                info!("Starting SSE transport on {}...", config.bind_address());
                mcp_toolbox::http::start_server(&config.host, config.port, server.clone()).await
            }
        }
    };

    tokio::select! {
        result = serving => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    Ok(())
}
