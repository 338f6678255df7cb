//! Registry of tool handlers.

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mcp::handler::{Arguments, FnTool, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};

/// A registered tool: its descriptor and the handler behind it.
struct Entry {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

/// Name-keyed tool registry that remembers registration order.
///
/// Descriptors are captured once at registration and never change.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) -> Result<()> {
        self.register_arc(Arc::new(handler))
    }

    /// Register a tool handler (Arc version).
    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let tool = handler.definition();
        if self.tools.contains_key(&tool.name) {
            return Err(Error::DuplicateName(tool.name));
        }
        self.tools.insert(tool.name.clone(), Entry { tool, handler });
        Ok(())
    }

    /// Register a closure as a tool.
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        func: F,
    ) -> Result<()>
    where
        F: Fn(Arguments) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync + 'static,
    {
        let tool = Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        };
        self.register(FnTool::new(tool, func))
    }

    /// All descriptors, in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.tools.values().map(|e| e.tool.clone()).collect()
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<(Tool, Arc<dyn ToolHandler>)> {
        self.tools
            .get(name)
            .map(|e| (e.tool.clone(), e.handler.clone()))
            .ok_or_else(|| Error::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::success_result;
    use async_trait::async_trait;
    use futures::FutureExt;
    use serde_json::json;

    struct NamedTool(&'static str);

    #[async_trait]
    impl ToolHandler for NamedTool {
        fn definition(&self) -> Tool {
            Tool {
                name: self.0.to_string(),
                description: format!("Test tool: {}", self.0),
                input_schema: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _args: Arguments) -> Result<ToolResult> {
            Ok(success_result(self.0))
        }
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["sell_stock", "buy_stock", "list_stocks", "get_balance"] {
            registry.register(NamedTool(name)).unwrap();
        }

        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["sell_stock", "buy_stock", "list_stocks", "get_balance"]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("list_stocks")).unwrap();

        let err = registry.register(NamedTool("list_stocks")).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(ref n) if n == "list_stocks"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("get_weather")).unwrap();

        let (tool, handler) = registry.resolve("get_weather").unwrap();
        assert_eq!(tool.name, "get_weather");
        let result = handler.execute(Arguments::new()).await.unwrap();
        assert_eq!(result.text(), "get_weather");

        let err = registry.resolve("get_tide").err().unwrap();
        assert_eq!(err.to_string(), "Unknown tool 'get_tide'");
    }

    #[tokio::test]
    async fn test_register_fn() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                "ping_tool",
                "Replies pong",
                json!({"type": "object"}),
                |_args| async { Ok(success_result("pong")) }.boxed(),
            )
            .unwrap();

        assert!(registry.contains("ping_tool"));
        let (_, handler) = registry.resolve("ping_tool").unwrap();
        assert_eq!(handler.execute(Arguments::new()).await.unwrap().text(), "pong");
    }
}
