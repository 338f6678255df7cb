//! `document_search(query)` over a [`DocumentIndex`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::Result;
use crate::mcp::handler::{get_optional_string_arg, json_result, Arguments, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};
use crate::mcp::registry::ToolRegistry;
use crate::service::DocumentIndex;

/// Score reported when nothing matched.
const NO_MATCH_SCORE: f64 = 1.0;

#[derive(Debug, Serialize)]
struct SearchResult {
    /// Best (lowest) distance among the returned chunks.
    max_score: f64,
    chunks: Vec<String>,
}

pub struct DocumentSearchTool {
    index: Arc<dyn DocumentIndex>,
    top_k: usize,
}

impl DocumentSearchTool {
    pub fn new(index: Arc<dyn DocumentIndex>, top_k: usize) -> Self {
        Self { index, top_k }
    }
}

#[async_trait]
impl ToolHandler for DocumentSearchTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "document_search".to_string(),
            description: "Search internal documents for relevant information. Returns the best score (lower is better) and the matching chunks.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look for"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let query = get_optional_string_arg(&args, "query").unwrap_or_default();
        if query.trim().is_empty() {
            return json_result(&SearchResult {
                max_score: NO_MATCH_SCORE,
                chunks: Vec::new(),
            });
        }

        let hits = self.index.search(&query, self.top_k).await?;
        let max_score = hits
            .iter()
            .map(|h| h.score)
            .min_by(f64::total_cmp)
            .unwrap_or(NO_MATCH_SCORE);

        json_result(&SearchResult {
            max_score,
            chunks: hits.into_iter().map(|h| h.content).collect(),
        })
    }
}

/// Register `document_search`.
pub fn register(
    registry: &mut ToolRegistry,
    index: Arc<dyn DocumentIndex>,
    top_k: usize,
) -> Result<()> {
    registry.register(DocumentSearchTool::new(index, top_k))
}
