use futures::future::BoxFuture;

use tandem_core::error::Result;
use tandem_core::traits::Tool;
use tandem_core::types::{ToolContext, Visibility};

/// Reports run internals back to the model.
///
/// Private: callable, but its calls are redacted from event subscribers and
/// it never appears in external tool listings.
pub struct RunDiagnosticsTool;

impl Tool for RunDiagnosticsTool {
    fn name(&self) -> &str {
        "run_diagnostics"
    }

    fn description(&self) -> &str {
        "Inspect the current run: run id, working directory, and whether a \
         memory store is attached."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn visibility(&self) -> Visibility {
        Visibility::Private
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            Ok(serde_json::json!({
                "run_id": ctx.run_id.to_string(),
                "working_dir": ctx.working_dir.display().to_string(),
                "memory_attached": ctx.memory.is_some(),
            }))
        })
    }
}
