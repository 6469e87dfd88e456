//! Graph edges and targets.

use std::collections::HashMap;
use std::sync::Arc;

use super::node::{Router, TaskGenerator};

/// Where an edge leads: another step, or the terminal marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    End,
}

impl Target {
    pub fn node(name: impl Into<String>) -> Self {
        Self::Node(name.into())
    }
}

/// Fan-out edge description: after `from` completes, `generator` produces an
/// unbounded set of work items; each runs `branch` concurrently on an
/// isolated state clone carrying the item at `item_key`. The join collects
/// each branch's `output_key` into an array at `collect_key`, ordered by
/// originating task index, then control moves to `to`.
pub struct FanOut {
    pub from: String,
    pub generator: Arc<dyn TaskGenerator>,
    pub branch: String,
    pub item_key: String,
    pub output_key: String,
    pub collect_key: String,
    pub to: Target,
}

pub enum Edge {
    /// Unconditional transition.
    Direct { from: String, to: Target },
    /// The router's verdict is matched exactly against declared targets; an
    /// undeclared verdict is a fatal `GraphRouting` error, never a default.
    Conditional {
        from: String,
        router: Arc<dyn Router>,
        targets: HashMap<String, Target>,
    },
    FanOut(FanOut),
}

impl Edge {
    pub fn from(&self) -> &str {
        match self {
            Edge::Direct { from, .. } => from,
            Edge::Conditional { from, .. } => from,
            Edge::FanOut(fan) => &fan.from,
        }
    }

    /// Every node this edge can transition to, for validation and cycle
    /// checking. Fan-out branches are not transitions; control never rests
    /// there.
    pub fn targets(&self) -> Vec<&Target> {
        match self {
            Edge::Direct { to, .. } => vec![to],
            Edge::Conditional { targets, .. } => targets.values().collect(),
            Edge::FanOut(fan) => vec![&fan.to],
        }
    }
}
