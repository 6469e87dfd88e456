//! Long-term memory tools.
//!
//! Both tools operate through the `MemoryStore` handle injected via
//! `ToolContext` — there is no ambient global store. Runs without a
//! configured store get a failure result the model can observe.

use futures::future::BoxFuture;

use tandem_core::error::{Result, TandemError};
use tandem_core::traits::Tool;
use tandem_core::types::ToolContext;

const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Persists a free-form memory about the user or task.
pub struct MemorySaveTool;

impl Tool for MemorySaveTool {
    fn name(&self) -> &str {
        "memory_save"
    }

    fn description(&self) -> &str {
        "Save a memory for future conversations: user preferences, personal \
         details, decisions, or anything worth remembering across sessions."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "memory": {
                    "type": "string",
                    "description": "The memory to store, as a self-contained sentence"
                }
            },
            "required": ["memory"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let store = ctx.memory.ok_or_else(|| TandemError::ToolExecution {
                tool: "memory_save".into(),
                message: "no memory store configured for this run".into(),
            })?;

            let memory = input
                .get("memory")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            store.save(memory).await?;
            Ok(serde_json::json!({ "saved": true }))
        })
    }
}

/// Retrieves memories relevant to a query.
pub struct MemorySearchTool;

impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search stored memories by keyword. Returns the most relevant \
         memories first."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "limit": {"type": "integer", "description": "Maximum results (default 5)"}
            },
            "required": ["query"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let store = ctx.memory.ok_or_else(|| TandemError::ToolExecution {
                tool: "memory_search".into(),
                message: "no memory store configured for this run".into(),
            })?;

            let query = input
                .get("query")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let limit = input
                .get("limit")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_SEARCH_LIMIT);

            let memories = store.search(query, limit).await?;
            Ok(serde_json::json!({ "memories": memories }))
        })
    }
}
