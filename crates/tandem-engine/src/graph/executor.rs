//! Workflow graph construction and execution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tandem_core::error::{Result, TandemError};

use super::edge::{Edge, FanOut, Target};
use super::node::{Router, Step, TaskGenerator};
use super::state::GraphState;

const DEFAULT_MAX_STEPS: usize = 50;

/// How a graph run ended. Step-budget exhaustion and cancellation are
/// structured outcomes preserving accumulated state, mirroring the loop
/// controller's termination semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphStatus {
    Completed,
    StepBudgetExhausted,
    Cancelled,
}

#[derive(Debug)]
pub struct GraphOutcome {
    pub status: GraphStatus,
    pub state: GraphState,
    pub steps_taken: usize,
    /// Step names in execution order.
    pub visited: Vec<String>,
}

/// Builder for a `WorkflowGraph`. Validation happens in `build`, so a
/// misconfigured graph fails at construction, not mid-run.
pub struct GraphBuilder {
    steps: HashMap<String, Arc<dyn Step>>,
    edges: Vec<Edge>,
    entry: Option<String>,
    max_steps: usize,
    loop_backs: HashSet<(String, String)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
            edges: Vec::new(),
            entry: None,
            max_steps: DEFAULT_MAX_STEPS,
            loop_backs: HashSet::new(),
        }
    }

    pub fn step(self, name: impl Into<String>, step: impl Step) -> Self {
        self.step_arc(name, Arc::new(step))
    }

    pub fn step_arc(mut self, name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.steps.insert(name.into(), step);
        self
    }

    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: Target) -> Self {
        self.edges.push(Edge::Direct {
            from: from.into(),
            to,
        });
        self
    }

    pub fn conditional(
        mut self,
        from: impl Into<String>,
        router: impl Router,
        targets: impl IntoIterator<Item = (&'static str, Target)>,
    ) -> Self {
        self.edges.push(Edge::Conditional {
            from: from.into(),
            router: Arc::new(router),
            targets: targets
                .into_iter()
                .map(|(verdict, target)| (verdict.to_string(), target))
                .collect(),
        });
        self
    }

    pub fn fan_out(mut self, fan: FanOut) -> Self {
        self.edges.push(Edge::FanOut(fan));
        self
    }

    /// Whitelist a loop-back transition for iterative refinement. The cycle
    /// check ignores it; the step budget bounds the iteration.
    pub fn allow_loop_back(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.loop_backs.insert((from.into(), to.into()));
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn build(self) -> Result<WorkflowGraph> {
        let entry = self
            .entry
            .ok_or_else(|| TandemError::GraphConfig("no entry step declared".into()))?;
        if !self.steps.contains_key(&entry) {
            return Err(TandemError::GraphConfig(format!(
                "entry step '{entry}' is not defined"
            )));
        }

        let mut edges: HashMap<String, Edge> = HashMap::new();
        for edge in self.edges {
            let from = edge.from().to_string();
            if !self.steps.contains_key(&from) {
                return Err(TandemError::GraphConfig(format!(
                    "edge leaves undefined step '{from}'"
                )));
            }
            for target in edge.targets() {
                if let Target::Node(to) = target {
                    if !self.steps.contains_key(to) {
                        return Err(TandemError::GraphConfig(format!(
                            "edge from '{from}' targets undefined step '{to}'"
                        )));
                    }
                }
            }
            if let Edge::Conditional { targets, .. } = &edge {
                if targets.is_empty() {
                    return Err(TandemError::GraphConfig(format!(
                        "conditional edge from '{from}' declares no targets"
                    )));
                }
            }
            if let Edge::FanOut(fan) = &edge {
                if !self.steps.contains_key(&fan.branch) {
                    return Err(TandemError::GraphConfig(format!(
                        "fan-out from '{from}' uses undefined branch step '{}'",
                        fan.branch
                    )));
                }
            }
            if edges.insert(from.clone(), edge).is_some() {
                return Err(TandemError::GraphConfig(format!(
                    "step '{from}' has more than one outgoing edge"
                )));
            }
        }

        let graph = WorkflowGraph {
            steps: self.steps,
            edges,
            entry,
            max_steps: self.max_steps,
        };
        graph.check_acyclic(&self.loop_backs)?;
        Ok(graph)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorkflowGraph {
    steps: HashMap<String, Arc<dyn Step>>,
    edges: HashMap<String, Edge>,
    entry: String,
    max_steps: usize,
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.keys().collect::<Vec<_>>())
            .field("entry", &self.entry)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl WorkflowGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Cycle detection over the transition graph, ignoring whitelisted
    /// loop-back edges.
    fn check_acyclic(&self, loop_backs: &HashSet<(String, String)>) -> Result<()> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, edge) in &self.edges {
            for target in edge.targets() {
                if let Target::Node(to) = target {
                    if loop_backs.contains(&(from.clone(), to.clone())) {
                        continue;
                    }
                    adjacency.entry(from).or_default().push(to);
                }
            }
        }

        // Iterative DFS with a three-colour marking.
        let mut finished: HashSet<&str> = HashSet::new();
        for start in self.steps.keys() {
            if finished.contains(start.as_str()) {
                continue;
            }
            let mut on_path: HashSet<&str> = HashSet::new();
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            on_path.insert(start.as_str());
            while let Some((node, next_child)) = stack.pop() {
                let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if next_child < children.len() {
                    stack.push((node, next_child + 1));
                    let child = children[next_child];
                    if on_path.contains(child) {
                        return Err(TandemError::GraphConfig(format!(
                            "cycle through '{child}' (loop-backs must be whitelisted)"
                        )));
                    }
                    if !finished.contains(child) {
                        on_path.insert(child);
                        stack.push((child, 0));
                    }
                } else {
                    on_path.remove(node);
                    finished.insert(node);
                }
            }
        }
        Ok(())
    }

    /// Execute the graph from its entry step.
    pub async fn run(
        &self,
        initial: GraphState,
        cancel: &CancellationToken,
    ) -> Result<GraphOutcome> {
        let mut state = initial;
        let mut visited = Vec::new();
        let mut steps_taken = 0usize;
        let mut current = self.entry.clone();

        loop {
            if cancel.is_cancelled() {
                return Ok(self.settle(GraphStatus::Cancelled, state, steps_taken, visited));
            }
            if steps_taken >= self.max_steps {
                warn!(step = %current, steps_taken, "graph step budget exhausted");
                return Ok(self.settle(
                    GraphStatus::StepBudgetExhausted,
                    state,
                    steps_taken,
                    visited,
                ));
            }

            let step = self
                .steps
                .get(&current)
                .ok_or_else(|| TandemError::GraphConfig(format!("step '{current}' vanished")))?;

            debug!(step = %current, steps_taken, "running graph step");
            let update = tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(self.settle(GraphStatus::Cancelled, state, steps_taken, visited));
                }
                res = step.run(state.clone()) => res?,
            };
            state.merge(update);
            steps_taken += 1;
            visited.push(current.clone());

            let target = match self.edges.get(&current) {
                // No outgoing edge: implicit end.
                None => Target::End,
                Some(Edge::Direct { to, .. }) => to.clone(),
                Some(Edge::Conditional {
                    router, targets, ..
                }) => {
                    let verdict = router.route(&state).await?;
                    match targets.get(&verdict) {
                        Some(target) => {
                            debug!(step = %current, %verdict, "router verdict");
                            target.clone()
                        }
                        None => {
                            return Err(TandemError::GraphRouting {
                                node: current,
                                verdict,
                            });
                        }
                    }
                }
                Some(Edge::FanOut(fan)) => {
                    match self.join_branches(fan, &state, cancel).await? {
                        Some(collected) => {
                            state.set(&fan.collect_key, Value::Array(collected));
                            fan.to.clone()
                        }
                        // Cancelled during fan-in.
                        None => {
                            return Ok(self.settle(
                                GraphStatus::Cancelled,
                                state,
                                steps_taken,
                                visited,
                            ));
                        }
                    }
                }
            };

            match target {
                Target::End => {
                    return Ok(self.settle(GraphStatus::Completed, state, steps_taken, visited));
                }
                Target::Node(next) => current = next,
            }
        }
    }

    /// Run all fan-out branches concurrently and collect their outputs in
    /// task-index order, regardless of completion order. Returns `None` when
    /// cancelled mid-wait; in-flight branches are aborted and their results
    /// discarded.
    async fn join_branches(
        &self,
        fan: &FanOut,
        state: &GraphState,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Value>>> {
        let items = fan.generator.generate(state)?;
        let total = items.len();
        debug!(branch = %fan.branch, total, "fanning out");

        let branch_step = self
            .steps
            .get(&fan.branch)
            .ok_or_else(|| {
                TandemError::GraphConfig(format!("branch step '{}' vanished", fan.branch))
            })?
            .clone();

        let mut handles = Vec::with_capacity(total);
        for (index, item) in items.into_iter().enumerate() {
            let step = branch_step.clone();
            let mut branch_state = state.clone();
            branch_state.set(&fan.item_key, item);
            branch_state.set("task_index", json!(index));
            handles.push(tokio::spawn(async move {
                let update = step.run(branch_state).await?;
                Ok::<(usize, GraphState), TandemError>((index, update))
            }));
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let abort_all = || {
            for handle in &abort_handles {
                handle.abort();
            }
        };

        let mut outputs: Vec<Value> = vec![Value::Null; total];
        let mut tasks: FuturesUnordered<_> = handles.into_iter().collect();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    abort_all();
                    return Ok(None);
                }
                joined = tasks.next() => match joined {
                    None => break,
                    Some(Ok(Ok((index, update)))) => {
                        outputs[index] = update.get(&fan.output_key).cloned().unwrap_or(Value::Null);
                    }
                    Some(Ok(Err(e))) => {
                        abort_all();
                        return Err(e);
                    }
                    Some(Err(join_err)) => {
                        abort_all();
                        return Err(TandemError::GraphConfig(format!(
                            "fan-out branch aborted: {join_err}"
                        )));
                    }
                },
            }
        }
        Ok(Some(outputs))
    }

    fn settle(
        &self,
        status: GraphStatus,
        state: GraphState,
        steps_taken: usize,
        visited: Vec<String>,
    ) -> GraphOutcome {
        info!(?status, steps_taken, "graph run over");
        GraphOutcome {
            status,
            state,
            steps_taken,
            visited,
        }
    }
}
