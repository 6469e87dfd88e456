use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Model collaborator — one request/response exchange per call.
///
/// The engine is transport-agnostic: implementations may talk HTTP to a
/// provider, replay a script, or wrap another client with retry policy.
pub trait ModelClient: Send + Sync + 'static {
    /// Send a conversation view plus the tool schemas in scope, and receive
    /// optional text and zero or more tool-call requests.
    fn invoke(
        &self,
        turns: Vec<Turn>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>>;

    /// Structured-output mode: the response is validated against the
    /// caller-supplied schema and returned as typed data, or fails with
    /// `SchemaValidation`.
    fn invoke_structured(
        &self,
        turns: Vec<Turn>,
        schema: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Tool — a named, schema-described function the model may request.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Whether this tool is surfaced to external observers.
    fn visibility(&self) -> Visibility {
        Visibility::Public
    }

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    /// Execute the tool with validated input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

impl<T: Tool + ?Sized> ToolExt for T {}

/// Derived helpers for any tool.
pub trait ToolExt: Tool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            visibility: self.visibility(),
        }
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// Run store — optional persistence backend for conversation history.
pub trait RunStore: Send + Sync + 'static {
    /// Load the turn log for a run, if one exists.
    fn load(&self, run_id: &RunId) -> BoxFuture<'_, Result<Option<Vec<Turn>>>>;

    /// Persist the full turn log for a run.
    fn save(&self, run_id: &RunId, turns: Vec<Turn>) -> BoxFuture<'_, Result<()>>;
}

/// Memory store consumed by the built-in memory tools.
///
/// An explicitly owned, injected handle with a defined lifecycle — created
/// per run or per process and passed to whoever needs it.
pub trait MemoryStore: Send + Sync + 'static {
    fn save(&self, memory: String) -> BoxFuture<'_, Result<()>>;

    fn search(&self, query: &str, limit: usize) -> BoxFuture<'_, Result<Vec<String>>>;
}
