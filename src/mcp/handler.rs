//! Tool handler trait and argument helpers.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::mcp::protocol::{ContentBlock, Tool, ToolResult};

/// Arguments of a tool call.
pub type Arguments = HashMap<String, Value>;

/// Handler for MCP tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Arguments) -> Result<ToolResult>;
}

type ToolFn = dyn Fn(Arguments) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync;

/// A tool backed by a closure, for handlers that need no state of their own.
pub struct FnTool {
    definition: Tool,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(definition: Tool, func: F) -> Self
    where
        F: Fn(Arguments) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync + 'static,
    {
        Self {
            definition,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl ToolHandler for FnTool {
    fn definition(&self) -> Tool {
        self.definition.clone()
    }

    async fn execute(&self, arguments: Arguments) -> Result<ToolResult> {
        (self.func)(arguments).await
    }
}

/// Names listed in the schema's `required` array.
pub fn required_arguments(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: false,
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: true,
    }
}

/// Serialize a value as pretty JSON into a single text block.
pub fn json_result<T: Serialize>(value: &T) -> Result<ToolResult> {
    Ok(success_result(serde_json::to_string_pretty(value)?))
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &Arguments, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| {
            Error::InvalidToolArguments(format!("Argument '{}' must be a string", name))
        })
}

/// Helper to extract an optional string argument.
pub fn get_optional_string_arg(args: &Arguments, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(String::from)
}

/// Helper to extract a required number argument.
///
/// Integers are accepted and widened.
pub fn get_number_arg(args: &Arguments, name: &str) -> Result<f64> {
    args.get(name).and_then(|v| v.as_f64()).ok_or_else(|| {
        Error::InvalidToolArguments(format!("Argument '{}' must be a number", name))
    })
}

/// Helper to extract a required integer argument.
pub fn get_int_arg(args: &Arguments, name: &str) -> Result<i64> {
    args.get(name).and_then(|v| v.as_i64()).ok_or_else(|| {
        Error::InvalidToolArguments(format!("Argument '{}' must be an integer", name))
    })
}
