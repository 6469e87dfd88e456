use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::str::FromStr for RunId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, unique within a run.
    pub id: String,
    /// Name of the requested tool.
    pub name: String,
    /// Structured arguments as emitted by the model.
    pub arguments: serde_json::Value,
}

/// Why a tool call produced no usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailure {
    /// The model requested a tool that is not registered.
    UnknownTool,
    /// Arguments did not satisfy the tool's input schema.
    InvalidArguments,
    /// The handler itself reported an error.
    ExecutionFailed,
    /// The handler exceeded its time bound.
    TimedOut,
}

/// Outcome of a single tool call, re-inserted into the conversation so the
/// model can observe it — including failures — and decide what to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: serde_json::Value },
    Failure { kind: ToolFailure, message: String },
}

impl ToolOutcome {
    pub fn success(payload: serde_json::Value) -> Self {
        Self::Success { payload }
    }

    pub fn failure(kind: ToolFailure, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// One atomic unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User { text: String },
    AssistantText { text: String },
    AssistantToolCall { call: ToolCall },
    ToolResult { call_id: String, outcome: ToolOutcome },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::AssistantText { text: text.into() }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self::AssistantToolCall { call }
    }

    pub fn tool_result(call_id: impl Into<String>, outcome: ToolOutcome) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            outcome,
        }
    }

    /// Text content, if this is a text-bearing turn.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::User { text } | Self::AssistantText { text } => Some(text),
            _ => None,
        }
    }
}

/// One model exchange: optional text plus zero or more tool-call requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: vec![],
        }
    }

    pub fn calling(calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }
}

/// Whether a tool is surfaced to external observers.
///
/// Private tools stay callable by the model but are hidden from event
/// subscribers and UI listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Tool definition for sending to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Context passed to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: RunId,
    pub working_dir: PathBuf,
    /// Injected memory store handle; never ambient global state.
    pub memory: Option<Arc<dyn crate::traits::MemoryStore>>,
}

impl ToolContext {
    pub fn for_run(run_id: RunId) -> Self {
        Self {
            run_id,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn crate::traits::MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("run_id", &self.run_id)
            .field("working_dir", &self.working_dir)
            .field("memory", &self.memory.is_some())
            .finish()
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    /// `turns_taken` reached `max_turns`. A normal terminal condition,
    /// not a failure.
    BudgetExhausted,
    /// External cancellation signal observed at a suspension point.
    Cancelled,
    /// The model collaborator failed after the retry policy was exhausted.
    ModelFailure { message: String },
}

/// Terminal status of a run segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The model produced a text-only answer; the loop rests until new
    /// external input arrives.
    AwaitingInput,
    Terminated { reason: TerminationReason },
}

/// Engine event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RunStarted {
        run_id: RunId,
    },
    /// A turn was appended to the conversation. Private tool calls are
    /// redacted before publishing.
    TurnAppended {
        run_id: RunId,
        turn: Turn,
    },
    ToolStart {
        name: String,
        input: serde_json::Value,
    },
    ToolEnd {
        name: String,
        outcome: ToolOutcome,
    },
    RunTerminated {
        run_id: RunId,
        status: RunStatus,
        turns_taken: usize,
    },
}
