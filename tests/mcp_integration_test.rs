//! MCP Server Integration Tests
//!
//! These tests spawn the built server binary and talk JSON-RPC to it over
//! stdio. Only the stocks and documents servers are exercised; they need no
//! network.

#![allow(deprecated)] // Allow deprecated cargo_bin for now

use assert_cmd::cargo::CommandCargoExt;
use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

/// MCP Test Client that communicates with the server via stdio
struct McpTestClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    request_id: i64,
}

impl McpTestClient {
    /// Spawn a server with extra arguments and connect to it
    fn spawn(args: &[&str]) -> Result<Self, Box<dyn std::error::Error>> {
        let mut child = Command::cargo_bin("mcp-toolbox")?
            .args(args)
            .arg("--transport")
            .arg("stdio")
            .env_remove("RUST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().expect("Failed to get stdin");
        let stdout = BufReader::new(child.stdout.take().expect("Failed to get stdout"));

        Ok(Self {
            child,
            stdin,
            stdout,
            request_id: 0,
        })
    }

    fn send(&mut self, message: &Value) -> Result<(), Box<dyn std::error::Error>> {
        writeln!(self.stdin, "{}", serde_json::to_string(message)?)?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Send a JSON-RPC request and get the response
    fn request(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.request_id += 1;
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "method": method,
            "params": params
        });
        self.send(&request)?;

        let mut response_line = String::new();
        self.stdout.read_line(&mut response_line)?;

        let response: Value = serde_json::from_str(&response_line)?;
        Ok(response)
    }

    /// Handshake: initialize, then the initialized notification.
    fn initialize(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let response = self.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }),
        )?;
        self.send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))?;
        Ok(response)
    }

    fn list_tools(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        self.request("tools/list", json!({}))
    }

    fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
    }

    /// Call a tool and parse its single JSON text block.
    fn call_json(&mut self, name: &str, arguments: Value) -> Value {
        let response = self.call_tool(name, arguments).expect("call failed");
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        serde_json::from_str(text).expect("JSON tool output")
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn stocks_server(dir: &TempDir) -> McpTestClient {
    let data_dir = dir.path().to_str().unwrap();
    let mut client = McpTestClient::spawn(&["--server", "stocks", "--data-dir", data_dir])
        .expect("Failed to spawn server");
    client.initialize().expect("Failed to initialize");
    client
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_binary_help() {
    AssertCommand::cargo_bin("mcp-toolbox")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--server"))
        .stdout(predicate::str::contains("--transport"));
}

#[test]
fn test_binary_version() {
    AssertCommand::cargo_bin("mcp-toolbox")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_binary_requires_server() {
    AssertCommand::cargo_bin("mcp-toolbox")
        .unwrap()
        .env_remove("MCP_TOOLBOX_SERVER")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--server"));
}

#[test]
fn test_mcp_initialize() {
    let dir = TempDir::new().unwrap();
    let mut client =
        McpTestClient::spawn(&["--server", "stocks", "--data-dir", dir.path().to_str().unwrap()])
            .expect("Failed to spawn server");

    let response = client.initialize().expect("Failed to initialize");
    assert_eq!(response["id"], json!(1));
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], json!("2024-11-05"));
    assert_eq!(result["serverInfo"]["name"], json!("stock-trading-mcp"));
    assert!(result["capabilities"]["tools"].is_object());
}

#[test]
fn test_mcp_rejects_calls_before_initialize() {
    let dir = TempDir::new().unwrap();
    let mut client =
        McpTestClient::spawn(&["--server", "stocks", "--data-dir", dir.path().to_str().unwrap()])
            .expect("Failed to spawn server");

    let response = client.list_tools().expect("Failed to send");
    assert_eq!(response["error"]["code"], json!(-32600));

    let pong = client.request("ping", json!({})).expect("Failed to ping");
    assert_eq!(pong["result"], json!({}));
}

#[test]
fn test_mcp_list_tools() {
    let dir = TempDir::new().unwrap();
    let mut client = stocks_server(&dir);

    let response = client.list_tools().expect("Failed to list tools");
    let names: Vec<&str> = response["result"]["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(
        names,
        [
            "debit_money",
            "credit_money",
            "get_balance",
            "buy_stock",
            "sell_stock",
            "list_stocks",
            "get_stock_price"
        ]
    );
}

#[test]
fn test_mcp_stock_trading_session() {
    let dir = TempDir::new().unwrap();
    let mut client = stocks_server(&dir);

    let balance = client.call_json("get_balance", json!({}));
    assert_eq!(balance, json!({"success": true, "balance": 100000.0}));

    let bought = client.call_json("buy_stock", json!({"stock_id": "nvda", "quantity": 5}));
    assert_eq!(bought["message"], json!("Bought 5 shares of NVDA"));

    let listed = client.call_json("list_stocks", json!({}));
    assert_eq!(listed["total_positions"], json!(1));
    assert_eq!(listed["stocks"][0], json!({"stock_id": "NVDA", "quantity": 5}));

    let debited = client.call_json("debit_money", json!({"amount": 250.5, "reason": "fees"}));
    assert_eq!(debited["balance"], json!(99749.5));

    let portfolio = std::fs::read_to_string(dir.path().join("stocks_portfolio.csv")).unwrap();
    assert!(portfolio.contains("NVDA,5"));
}

#[test]
fn test_mcp_invalid_tool_and_missing_argument() {
    let dir = TempDir::new().unwrap();
    let mut client = stocks_server(&dir);

    let response = client
        .call_tool("nonexistent_tool", json!({}))
        .expect("Failed to call tool");
    assert_eq!(response["error"]["code"], json!(-32602));
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("nonexistent_tool"));

    let response = client
        .call_tool("buy_stock", json!({"stock_id": "AAPL"}))
        .expect("Failed to call tool");
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("quantity"));

    // The session survives tool-level errors.
    let balance = client.call_json("get_balance", json!({}));
    assert_eq!(balance["success"], json!(true));
}

#[test]
fn test_mcp_document_search_after_ingest() {
    let dir = TempDir::new().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir(&docs).unwrap();
    std::fs::write(
        docs.join("handbook.md"),
        "Employees accrue two days of annual leave per month of service.",
    )
    .unwrap();
    std::fs::write(docs.join("menu.txt"), "The canteen serves soup on Fridays.").unwrap();
    let index = dir.path().join("index.json");

    let mut client = McpTestClient::spawn(&[
        "--server",
        "documents",
        "--index-path",
        index.to_str().unwrap(),
        "--ingest",
        docs.to_str().unwrap(),
    ])
    .expect("Failed to spawn server");
    client.initialize().expect("Failed to initialize");

    let found = client.call_json("document_search", json!({"query": "annual leave"}));
    assert!(found["max_score"].as_f64().unwrap() < 1.0);
    assert!(found["chunks"][0].as_str().unwrap().contains("annual leave"));

    let empty = client.call_json("document_search", json!({"query": ""}));
    assert_eq!(empty, json!({"max_score": 1.0, "chunks": []}));

    assert!(index.exists());
}

#[test]
fn test_client_binary_lists_tools_over_stdio() {
    let dir = TempDir::new().unwrap();
    let server = assert_cmd::cargo::cargo_bin("mcp-toolbox");

    AssertCommand::cargo_bin("mcp-toolbox-client")
        .unwrap()
        .arg("--command")
        .arg(server)
        .arg("--arg=--server")
        .arg("--arg=stocks")
        .arg("--arg=--data-dir")
        .arg(format!("--arg={}", dir.path().display()))
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("buy_stock"))
        .stdout(predicate::str::contains("get_stock_price"));
}

#[test]
fn test_client_binary_calls_tool_over_stdio() {
    let dir = TempDir::new().unwrap();
    let server = assert_cmd::cargo::cargo_bin("mcp-toolbox");

    AssertCommand::cargo_bin("mcp-toolbox-client")
        .unwrap()
        .arg("--command")
        .arg(server)
        .arg("--arg=--server")
        .arg("--arg=stocks")
        .arg("--arg=--data-dir")
        .arg(format!("--arg={}", dir.path().display()))
        .arg("call")
        .arg("credit_money")
        .arg(r#"{"amount": 10}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("100010"));
}
