use thiserror::Error;

#[derive(Debug, Error)]
pub enum TandemError {
    // Model errors
    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("model response parse error: {0}")]
    ModelParse(String),

    #[error("structured output did not match schema: {0}")]
    SchemaValidation(String),

    // Tool errors — always absorbed at the dispatcher boundary and turned
    // into failure tool_results; they never terminate a run.
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool input validation failed: {0}")]
    ToolValidation(String),

    #[error("tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Conversation invariant violations (programming errors, not model errors)
    #[error("conversation invariant violated: {0}")]
    Conversation(String),

    // Graph errors — configuration defects, fatal and immediate
    #[error("graph router for node '{node}' returned undeclared target '{verdict}'")]
    GraphRouting { node: String, verdict: String },

    #[error("graph configuration error: {0}")]
    GraphConfig(String),

    // Run control
    #[error("run cancelled")]
    Cancelled,

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("store error: {0}")]
    Store(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TandemError>;
