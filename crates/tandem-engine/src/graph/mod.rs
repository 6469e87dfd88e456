//! Graph composition layer: workflows as directed graphs of steps.
//!
//! Generalizes the run loop to conditional routing, fan-out/fan-in parallel
//! workers, and bounded iterative refinement via whitelisted loop-backs.

pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use edge::{Edge, FanOut, Target};
pub use executor::{GraphBuilder, GraphOutcome, GraphStatus, WorkflowGraph};
pub use node::{
    AgentStep, FnRouter, FnStep, FnTasks, ItemsAt, ModelRouter, Router, Step, TaskGenerator,
};
pub use state::GraphState;
