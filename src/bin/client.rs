//! Thin MCP client: connect to a tool server over stdio or SSE, then list or
//! call its tools.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use mcp_toolbox::client::{
    ClientOptions, ClientTransport, McpClient, SseClientTransport, StdioClientTransport,
};

#[derive(Parser, Debug)]
#[command(name = "mcp-toolbox-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Call tools on an MCP server over stdio or SSE")]
struct Cli {
    /// Base URL of an SSE server, e.g. http://127.0.0.1:8020
    #[arg(long, env = "MCP_TOOLBOX_URL", conflicts_with = "command")]
    url: Option<String>,

    /// Server program to spawn over stdio
    #[arg(long)]
    command: Option<String>,

    /// Arguments passed to the spawned server
    #[arg(long = "arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Handshake timeout in seconds
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the server's initialize result
    Info,
    /// List the server's tools
    List,
    /// Call a tool with JSON arguments
    Call {
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

async fn run<T: ClientTransport>(
    transport: T,
    options: ClientOptions,
    action: Action,
) -> anyhow::Result<()> {
    let client = McpClient::connect(transport, options)
        .await
        .context("failed to connect")?;
    debug!("Session state: {:?}", client.state());

    let outcome = perform(&client, action).await;
    client.close().await.ok();
    outcome
}

async fn perform<T: ClientTransport>(client: &McpClient<T>, action: Action) -> anyhow::Result<()> {
    match action {
        Action::Info => {
            let info = client.server_info().await.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Action::List => {
            for tool in client.list_tools().await? {
                println!("{:<18} {}", tool.name, tool.description);
            }
        }
        Action::Call { name, arguments } => {
            let arguments: Value =
                serde_json::from_str(&arguments).context("arguments must be JSON")?;
            if !arguments.is_object() {
                bail!("arguments must be a JSON object");
            }
            let result = client.call_tool(&name, arguments).await?;
            println!("{}", result.text());
            if result.is_error {
                bail!("tool '{}' reported an error", name);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = ClientOptions {
        connect_timeout: Duration::from_secs(cli.connect_timeout),
        request_timeout: Duration::from_secs(cli.request_timeout),
        ..ClientOptions::default()
    };

    match (cli.url, cli.command) {
        (Some(url), None) => {
            let transport = SseClientTransport::new(url)?.with_post_timeout(options.request_timeout);
            run(transport, options, cli.action).await
        }
        (None, Some(program)) => {
            let transport = StdioClientTransport::new(program, cli.server_args);
            run(transport, options, cli.action).await
        }
        _ => bail!("pass either --url or --command"),
    }
}
