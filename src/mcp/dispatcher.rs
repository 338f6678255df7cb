//! Tool call dispatch.
//!
//! Maps a decoded `tools/call` to its registered handler and turns whatever
//! happens into exactly one response. Handler failures, including panics,
//! become error responses; they never reach the transport.

use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mcp::handler::{required_arguments, Arguments};
use crate::mcp::protocol::{CallToolParams, JsonRpcResponse, RequestId, ToolResult};
use crate::mcp::registry::ToolRegistry;
use crate::metrics::{Metrics, Timer};

/// Stateless dispatcher over a shared registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, metrics: Arc<Metrics>) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle the params of a `tools/call` request and build its response.
    ///
    /// The response always echoes `id`.
    pub async fn dispatch(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let outcome = match parse_params(params) {
            Ok(params) => self.call_tool(&params.name, params.arguments).await,
            Err(e) => Err(e),
        };

        match outcome.and_then(|result| Ok(serde_json::to_value(result)?)) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::from_error(id, &e),
        }
    }

    /// Resolve, validate and invoke a tool.
    pub async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<ToolResult> {
        let (tool, handler) = self.registry.resolve(name)?;

        let missing = missing_arguments(&tool.input_schema, &arguments);
        if !missing.is_empty() {
            debug!("Rejecting call to {}: missing {:?}", name, missing);
            return Err(Error::Validation(missing));
        }

        self.metrics.inc_tool_calls();
        let timer = Timer::start();
        let outcome = AssertUnwindSafe(handler.execute(arguments))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                debug!("Tool {} completed in {} ms", name, timer.elapsed_ms());
                Ok(result)
            }
            Ok(Err(e)) => {
                self.metrics.inc_tool_failures();
                warn!("Tool {} failed after {} ms: {}", name, timer.elapsed_ms(), e);
                Err(e)
            }
            Err(panic) => {
                self.metrics.inc_tool_failures();
                let message = panic_message(panic.as_ref());
                warn!("Tool {} panicked: {}", name, message);
                Err(Error::Handler(format!("tool '{}' panicked: {}", name, message)))
            }
        }
    }
}

fn parse_params(params: Option<Value>) -> Result<CallToolParams> {
    params
        .ok_or_else(|| Error::InvalidToolArguments("Missing params".to_string()))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| Error::InvalidToolArguments(e.to_string()))
        })
}

/// Required fields that are absent or `null`.
fn missing_arguments(schema: &Value, arguments: &Arguments) -> Vec<String> {
    required_arguments(schema)
        .into_iter()
        .filter(|field| arguments.get(field).map_or(true, Value::is_null))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
