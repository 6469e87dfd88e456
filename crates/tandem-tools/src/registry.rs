use std::collections::HashMap;
use std::sync::Arc;

use tandem_core::error::{Result, TandemError};
use tandem_core::traits::{Tool, ToolExt};
use tandem_core::types::{ToolContext, ToolDefinition, Visibility};

/// Registry of available tools.
///
/// Read-only after initialization; share it behind an `Arc` for concurrent
/// reads from parallel branches.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Fails if the name is already taken — name resolution
    /// is a closed, validated lookup, so collisions are configuration bugs.
    pub fn register(&mut self, tool: impl Tool) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(TandemError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Resolve a tool by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| TandemError::ToolNotFound(name.to_string()))
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Visibility of a tool, if registered.
    pub fn visibility_of(&self, name: &str) -> Option<Visibility> {
        self.tools.get(name).map(|t| t.visibility())
    }

    /// Tool definitions for sending to the model.
    ///
    /// The model always sees every tool; pass `include_private = false` when
    /// building listings for external UIs or logs.
    pub fn definitions(&self, include_private: bool) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| include_private || t.visibility() == Visibility::Public)
            .map(|t| t.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name under its declared timeout.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<serde_json::Value> {
        let tool = self.resolve(name)?;
        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(TandemError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // Registration order is irrelevant; names are checked for collisions.
        registry
            .register(crate::builtin::clock::CurrentTimeTool)
            .expect("builtin names are unique");
        registry
            .register(crate::builtin::memory::MemorySaveTool)
            .expect("builtin names are unique");
        registry
            .register(crate::builtin::memory::MemorySearchTool)
            .expect("builtin names are unique");
        registry
            .register(crate::builtin::diag::RunDiagnosticsTool)
            .expect("builtin names are unique");

        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use tandem_core::types::RunId;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input back"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        fn execute(
            &self,
            input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move { Ok(input) })
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps past its timeout"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        fn timeout_secs(&self) -> u64 {
            1
        }

        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(serde_json::Value::Null)
            })
        }
    }

    struct HiddenTool;

    impl Tool for HiddenTool {
        fn name(&self) -> &str {
            "hidden"
        }

        fn description(&self) -> &str {
            "Not for external eyes"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        fn visibility(&self) -> Visibility {
            Visibility::Private
        }

        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move { Ok(serde_json::json!("ok")) })
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let err = registry.register(EchoTool).unwrap_err();
        assert!(matches!(err, TandemError::DuplicateTool(name) if name == "echo"));
    }

    #[test]
    fn resolve_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.resolve("does_not_exist").unwrap_err();
        assert!(matches!(err, TandemError::ToolNotFound(_)));
    }

    #[test]
    fn private_tools_filtered_from_external_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(HiddenTool).unwrap();

        let external: Vec<String> = registry
            .definitions(false)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(external, vec!["echo"]);

        let model_view: Vec<String> = registry
            .definitions(true)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(model_view, vec!["echo", "hidden"]);
    }

    #[tokio::test]
    async fn execute_round_trip() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let out = registry
            .execute(
                "echo",
                serde_json::json!({"x": 1}),
                ToolContext::for_run(RunId::new()),
            )
            .await
            .unwrap();
        assert_eq!(out["x"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_tool_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();

        let err = registry
            .execute(
                "slow",
                serde_json::json!({}),
                ToolContext::for_run(RunId::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::ToolTimeout { timeout_secs: 1, .. }));
    }

    #[test]
    fn builtins_register_cleanly() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.resolve("current_time").is_ok());
        assert!(registry.resolve("memory_save").is_ok());
        assert!(registry.resolve("memory_search").is_ok());
        assert_eq!(
            registry.visibility_of("run_diagnostics"),
            Some(Visibility::Private)
        );
    }
}
