//! Shared graph state: a JSON key/value map.
//!
//! State is passed by value into steps; steps return partial updates that
//! the executor merges back. Fan-out branches each get an isolated clone, so
//! only the join point ever writes to the shared copy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    data: serde_json::Map<String, Value>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for seeding initial state.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Merge a partial update into this state. Update keys win.
    pub fn merge(&mut self, update: GraphState) {
        for (key, value) in update.data {
            self.data.insert(key, value);
        }
    }

    pub fn data(&self) -> &serde_json::Map<String, Value> {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
