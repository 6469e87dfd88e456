//! Turn executor: one model exchange per step.

use std::sync::Arc;

use tracing::debug;

use tandem_core::error::Result;
use tandem_core::traits::ModelClient;
use tandem_core::types::{ModelResponse, ToolDefinition};

use crate::budget::RunBudget;
use crate::conversation::Conversation;
use crate::window::ContextWindow;

/// Drives exactly one model exchange: window the conversation, invoke the
/// model, append the response atomically, consume one unit of budget.
///
/// A failed invocation leaves conversation and budget untouched, so the same
/// step can be replayed against a deterministic client with identical results.
pub struct TurnExecutor {
    model: Arc<dyn ModelClient>,
    window: Box<dyn ContextWindow>,
}

impl TurnExecutor {
    pub fn new(model: Arc<dyn ModelClient>, window: Box<dyn ContextWindow>) -> Self {
        Self { model, window }
    }

    pub async fn step(
        &self,
        conversation: &mut Conversation,
        budget: &mut RunBudget,
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse> {
        let view = self.window.view(conversation.turns());
        debug!(
            view_turns = view.len(),
            total_turns = conversation.turns().len(),
            "invoking model"
        );

        let response = self.model.invoke(view, tools).await?;

        conversation.push_model_step(&response)?;
        budget.try_consume();

        debug!(
            text = response.text.is_some(),
            tool_calls = response.tool_calls.len(),
            turns_taken = budget.turns_taken(),
            "model step complete"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_core::error::TandemError;
    use tandem_core::types::{ToolCall, Turn};
    use tandem_llm::scripted::{ClosureClient, ScriptedClient};

    use crate::window::FullHistory;

    fn executor(model: impl ModelClient) -> TurnExecutor {
        TurnExecutor::new(Arc::new(model), Box::new(FullHistory))
    }

    #[tokio::test]
    async fn step_appends_text_and_calls_atomically() {
        let client = ScriptedClient::new().push_response(ModelResponse {
            text: Some("let me check".into()),
            tool_calls: vec![ToolCall {
                id: "c1".into(),
                name: "clock".into(),
                arguments: json!({}),
            }],
        });
        let executor = executor(client);

        let mut conv = Conversation::new();
        conv.push_user("what time is it?").unwrap();
        let mut budget = RunBudget::new(5);

        let resp = executor.step(&mut conv, &mut budget, &[]).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(conv.turns().len(), 3); // user, text, call
        assert_eq!(budget.turns_taken(), 1);
        assert_eq!(conv.pending_calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_invocation_leaves_state_untouched() {
        let client = ScriptedClient::new()
            .push_error(TandemError::ModelInvocation("boom".into()));
        let executor = executor(client);

        let mut conv = Conversation::new();
        conv.push_user("hi").unwrap();
        let mut budget = RunBudget::new(5);

        let err = executor.step(&mut conv, &mut budget, &[]).await.unwrap_err();
        assert!(matches!(err, TandemError::ModelInvocation(_)));
        assert_eq!(conv.turns().len(), 1);
        assert_eq!(budget.turns_taken(), 0);
    }

    #[tokio::test]
    async fn identical_views_produce_identical_steps() {
        // A response that is a pure function of the view makes idempotence
        // observable: two fresh conversations with the same seed end up
        // byte-identical after one step each.
        let client = Arc::new(ClosureClient::new(|turns: &[Turn]| {
            ModelResponse::text_only(format!("echo of {} turns", turns.len()))
        }));

        let mut results = Vec::new();
        for _ in 0..2 {
            let executor =
                TurnExecutor::new(client.clone(), Box::new(FullHistory));
            let mut conv = Conversation::new();
            conv.push_user("same seed").unwrap();
            let mut budget = RunBudget::new(3);
            executor.step(&mut conv, &mut budget, &[]).await.unwrap();
            results.push(conv.into_turns());
        }

        assert_eq!(results[0], results[1]);
    }
}
