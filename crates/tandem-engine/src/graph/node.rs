//! Graph steps and routers.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use tandem_core::error::{Result, TandemError};
use tandem_core::traits::ModelClient;
use tandem_core::types::{RunId, Turn};

use super::state::GraphState;
use crate::controller::LoopController;

/// A unit of work in the graph. Receives the full state by value and returns
/// a partial update; it never mutates shared state directly.
pub trait Step: Send + Sync + 'static {
    fn run(&self, state: GraphState) -> BoxFuture<'_, Result<GraphState>>;
}

type StepFn = dyn Fn(GraphState) -> Result<GraphState> + Send + Sync;

/// Step backed by a synchronous closure. The workhorse for pure state
/// transformations and for tests.
pub struct FnStep {
    f: Box<StepFn>,
}

impl FnStep {
    pub fn new(f: impl Fn(GraphState) -> Result<GraphState> + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl Step for FnStep {
    fn run(&self, state: GraphState) -> BoxFuture<'_, Result<GraphState>> {
        Box::pin(async move { (self.f)(state) })
    }
}

/// Step that runs a full agent loop: reads its prompt from `prompt_key`,
/// drives the controller to rest, and writes the final answer to
/// `output_key`.
pub struct AgentStep {
    controller: Arc<LoopController>,
    prompt_key: String,
    output_key: String,
}

impl AgentStep {
    pub fn new(
        controller: Arc<LoopController>,
        prompt_key: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            prompt_key: prompt_key.into(),
            output_key: output_key.into(),
        }
    }
}

impl Step for AgentStep {
    fn run(&self, state: GraphState) -> BoxFuture<'_, Result<GraphState>> {
        Box::pin(async move {
            let prompt = state
                .get_str(&self.prompt_key)
                .ok_or_else(|| {
                    TandemError::GraphConfig(format!(
                        "agent step expects a string at '{}'",
                        self.prompt_key
                    ))
                })?
                .to_string();

            let outcome = self.controller.run(RunId::new(), &prompt).await?;
            let update = GraphState::new().with(
                &self.output_key,
                json!(outcome.final_text.unwrap_or_default()),
            );
            Ok(update)
        })
    }
}

/// Decides which declared target a conditional edge follows.
pub trait Router: Send + Sync + 'static {
    fn route<'a>(&'a self, state: &'a GraphState) -> BoxFuture<'a, Result<String>>;
}

type RouterFn = dyn Fn(&GraphState) -> Result<String> + Send + Sync;

/// Router backed by a synchronous closure over the state.
pub struct FnRouter {
    f: Box<RouterFn>,
}

impl FnRouter {
    pub fn new(f: impl Fn(&GraphState) -> Result<String> + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl Router for FnRouter {
    fn route<'a>(&'a self, state: &'a GraphState) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { (self.f)(state) })
    }
}

/// Router that asks the model to classify, constrained by structured output
/// to the declared verdicts. An out-of-range answer fails schema validation
/// in the client before it can ever reach the graph executor.
pub struct ModelRouter {
    model: Arc<dyn ModelClient>,
    instruction: String,
    input_key: String,
    verdicts: Vec<String>,
}

impl ModelRouter {
    pub fn new(
        model: Arc<dyn ModelClient>,
        instruction: impl Into<String>,
        input_key: impl Into<String>,
        verdicts: Vec<String>,
    ) -> Self {
        Self {
            model,
            instruction: instruction.into(),
            input_key: input_key.into(),
            verdicts,
        }
    }
}

impl Router for ModelRouter {
    fn route<'a>(&'a self, state: &'a GraphState) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let input = state.get_str(&self.input_key).unwrap_or_default();
            let schema = json!({
                "type": "object",
                "properties": {
                    "verdict": {"type": "string", "enum": self.verdicts}
                },
                "required": ["verdict"]
            });

            let turns = vec![Turn::user(format!("{}\n\n{}", self.instruction, input))];
            let value = self.model.invoke_structured(turns, schema).await?;
            let verdict = value
                .get("verdict")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    TandemError::ModelParse("router response missing 'verdict'".into())
                })?;
            Ok(verdict.to_string())
        })
    }
}

/// Produces the work items a fan-out edge distributes across branches.
pub trait TaskGenerator: Send + Sync + 'static {
    fn generate(&self, state: &GraphState) -> Result<Vec<serde_json::Value>>;
}

type TasksFn = dyn Fn(&GraphState) -> Result<Vec<serde_json::Value>> + Send + Sync;

pub struct FnTasks {
    f: Box<TasksFn>,
}

impl FnTasks {
    pub fn new(
        f: impl Fn(&GraphState) -> Result<Vec<serde_json::Value>> + Send + Sync + 'static,
    ) -> Self {
        Self { f: Box::new(f) }
    }
}

impl TaskGenerator for FnTasks {
    fn generate(&self, state: &GraphState) -> Result<Vec<serde_json::Value>> {
        (self.f)(state)
    }
}

/// Generator that reads a ready-made task array from a state key, as left
/// behind by a planning step.
pub struct ItemsAt {
    key: String,
}

impl ItemsAt {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl TaskGenerator for ItemsAt {
    fn generate(&self, state: &GraphState) -> Result<Vec<serde_json::Value>> {
        match state.get(&self.key) {
            Some(serde_json::Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(TandemError::GraphConfig(format!(
                "fan-out key '{}' holds {other}, expected an array",
                self.key
            ))),
            None => Err(TandemError::GraphConfig(format!(
                "fan-out key '{}' missing from state",
                self.key
            ))),
        }
    }
}
