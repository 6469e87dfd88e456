pub mod config;
pub mod error;
pub mod event;
pub mod schema;
pub mod traits;
pub mod types;

pub use config::{AppConfig, EngineConfig, ModelConfig, RetryConfig};
pub use error::{Result, TandemError};
pub use event::EventBus;
pub use traits::{MemoryStore, ModelClient, RunStore, Tool, ToolExt};
pub use types::{
    EngineEvent, ModelResponse, RunId, RunStatus, TerminationReason, ToolCall, ToolContext,
    ToolDefinition, ToolFailure, ToolOutcome, Turn, Visibility,
};
