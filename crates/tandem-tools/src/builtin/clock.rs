use futures::future::BoxFuture;

use tandem_core::error::Result;
use tandem_core::traits::Tool;
use tandem_core::types::ToolContext;

/// Reports the current date and time.
pub struct CurrentTimeTool;

impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Useful for anything time-sensitive: \
         scheduling, relative dates, or timestamping saved memories."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "enum": ["utc", "local"],
                    "description": "Which clock to read (default: utc)"
                }
            }
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let local = input.get("timezone").and_then(|v| v.as_str()) == Some("local");
            let iso = if local {
                chrono::Local::now().to_rfc3339()
            } else {
                chrono::Utc::now().to_rfc3339()
            };
            Ok(serde_json::json!({ "iso": iso }))
        })
    }
}
