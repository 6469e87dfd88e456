//! Tandem execution engine: conversation state, run budget, turn executor,
//! tool dispatcher, loop controller, and the graph composition layer.

pub mod budget;
pub mod controller;
pub mod conversation;
pub mod dispatcher;
pub mod executor;
pub mod graph;
pub mod store;
pub mod window;

pub use budget::RunBudget;
pub use controller::{LoopController, LoopState, RunOutcome};
pub use conversation::Conversation;
pub use dispatcher::ToolDispatcher;
pub use executor::TurnExecutor;
pub use store::InMemoryRunStore;
pub use window::{ContextWindow, FullHistory, TokenBudget};
