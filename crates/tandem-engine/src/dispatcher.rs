//! Tool dispatcher: turns a batch of tool calls into tool results.
//!
//! Every way a call can go wrong — unknown tool, bad arguments, handler
//! error, timeout — becomes a failure `tool_result` the model can observe
//! and react to. The only error that escapes the dispatcher is cancellation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tandem_core::error::{Result, TandemError};
use tandem_core::event::EventBus;
use tandem_core::schema;
use tandem_core::types::{
    EngineEvent, ToolCall, ToolContext, ToolFailure, ToolOutcome, Visibility,
};
use tandem_tools::ToolRegistry;

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    parallel: bool,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, parallel: bool) -> Self {
        Self { registry, parallel }
    }

    /// Execute a batch of tool calls, returning one outcome per call in
    /// request order regardless of completion order. Fails only with
    /// `Cancelled`.
    pub async fn dispatch(
        &self,
        calls: &[ToolCall],
        ctx: &ToolContext,
        cancel: &CancellationToken,
        events: &EventBus,
    ) -> Result<Vec<ToolOutcome>> {
        if cancel.is_cancelled() {
            return Err(TandemError::Cancelled);
        }

        if self.parallel && calls.len() > 1 {
            // join_all yields results in future order, which is request
            // order — completion order never leaks through.
            let batch = futures::future::join_all(
                calls.iter().map(|call| self.run_one(call, ctx, events)),
            );
            tokio::select! {
                _ = cancel.cancelled() => Err(TandemError::Cancelled),
                outcomes = batch => Ok(outcomes),
            }
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TandemError::Cancelled),
                    outcome = self.run_one(call, ctx, events) => outcomes.push(outcome),
                }
            }
            Ok(outcomes)
        }
    }

    async fn run_one(&self, call: &ToolCall, ctx: &ToolContext, events: &EventBus) -> ToolOutcome {
        // Start/end events bracket every call, including ones that fail
        // before the handler runs, so subscribers see the whole batch.
        let published_input = match self.registry.visibility_of(&call.name) {
            Some(Visibility::Private) => serde_json::Value::Null,
            _ => call.arguments.clone(),
        };
        events.publish(EngineEvent::ToolStart {
            name: call.name.clone(),
            input: published_input,
        });

        let outcome = self.execute_call(call, ctx).await;
        events.publish(EngineEvent::ToolEnd {
            name: call.name.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutcome {
        let tool = match self.registry.resolve(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool = %call.name, "model requested unknown tool");
                return ToolOutcome::failure(ToolFailure::UnknownTool, e.to_string());
            }
        };

        if let Err(message) = schema::validate(&tool.input_schema(), &call.arguments) {
            debug!(tool = %call.name, %message, "tool arguments rejected");
            return ToolOutcome::failure(ToolFailure::InvalidArguments, message);
        }

        match self
            .registry
            .execute(&call.name, call.arguments.clone(), ctx.clone())
            .await
        {
            Ok(payload) => ToolOutcome::success(payload),
            Err(TandemError::ToolTimeout { tool, timeout_secs }) => {
                warn!(%tool, timeout_secs, "tool timed out");
                ToolOutcome::failure(
                    ToolFailure::TimedOut,
                    format!("{tool} exceeded its {timeout_secs}s time bound"),
                )
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool execution failed");
                ToolOutcome::failure(ToolFailure::ExecutionFailed, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::json;
    use tandem_core::traits::Tool;
    use tandem_core::types::RunId;

    /// Echoes its input after sleeping for the requested number of
    /// milliseconds, so completion order can be randomized in tests.
    struct DelayTool;

    impl Tool for DelayTool {
        fn name(&self) -> &str {
            "delay_echo"
        }

        fn description(&self) -> &str {
            "Echoes `tag` after `delay_ms` milliseconds"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "tag": {"type": "string"},
                    "delay_ms": {"type": "integer"}
                },
                "required": ["tag"]
            })
        }

        fn execute(
            &self,
            input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move {
                let delay = input.get("delay_ms").and_then(|v| v.as_u64()).unwrap_or(0);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                Ok(json!({"tag": input["tag"]}))
            })
        }
    }

    struct FailingTool;

    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "always_fails"
        }

        fn description(&self) -> &str {
            "Fails on every call"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move {
                Err(TandemError::ToolExecution {
                    tool: "always_fails".into(),
                    message: "synthetic failure".into(),
                })
            })
        }
    }

    fn dispatcher(parallel: bool) -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(DelayTool).unwrap();
        registry.register(FailingTool).unwrap();
        ToolDispatcher::new(Arc::new(registry), parallel)
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn results_keep_request_order_under_random_delays() {
        use rand::Rng;

        let dispatcher = dispatcher(true);
        let ctx = ToolContext::for_run(RunId::new());
        let cancel = CancellationToken::new();
        let events = EventBus::default();

        let mut rng = rand::thread_rng();
        let calls: Vec<ToolCall> = (0..6)
            .map(|i| {
                call(
                    &format!("c{i}"),
                    "delay_echo",
                    json!({"tag": format!("t{i}"), "delay_ms": rng.gen_range(0..40)}),
                )
            })
            .collect();

        let outcomes = dispatcher
            .dispatch(&calls, &ctx, &cancel, &events)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 6);
        for (i, outcome) in outcomes.iter().enumerate() {
            match outcome {
                ToolOutcome::Success { payload } => {
                    assert_eq!(payload["tag"], format!("t{i}"));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unknown_tool_becomes_failure_result() {
        let dispatcher = dispatcher(false);
        let ctx = ToolContext::for_run(RunId::new());
        let outcomes = dispatcher
            .dispatch(
                &[call("c1", "no_such_tool", json!({}))],
                &ctx,
                &CancellationToken::new(),
                &EventBus::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            outcomes,
            vec![ToolOutcome::failure(
                ToolFailure::UnknownTool,
                "tool not found: no_such_tool"
            )]
        );
    }

    #[tokio::test]
    async fn invalid_arguments_become_failure_result() {
        let dispatcher = dispatcher(false);
        let ctx = ToolContext::for_run(RunId::new());
        let outcomes = dispatcher
            .dispatch(
                // `tag` is required and must be a string.
                &[call("c1", "delay_echo", json!({"tag": 7}))],
                &ctx,
                &CancellationToken::new(),
                &EventBus::default(),
            )
            .await
            .unwrap();

        match &outcomes[0] {
            ToolOutcome::Failure { kind, .. } => {
                assert_eq!(*kind, ToolFailure::InvalidArguments);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_failures_still_reach_event_subscribers() {
        let dispatcher = dispatcher(false);
        let ctx = ToolContext::for_run(RunId::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();

        dispatcher
            .dispatch(
                &[call("c1", "no_such_tool", json!({}))],
                &ctx,
                &CancellationToken::new(),
                &events,
            )
            .await
            .unwrap();

        let mut saw_start = false;
        let mut end_outcome = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::ToolStart { name, .. } if name == "no_such_tool" => saw_start = true,
                EngineEvent::ToolEnd { name, outcome } if name == "no_such_tool" => {
                    end_outcome = Some(outcome);
                }
                _ => {}
            }
        }
        assert!(saw_start);
        match end_outcome {
            Some(ToolOutcome::Failure { kind, .. }) => {
                assert_eq!(kind, ToolFailure::UnknownTool);
            }
            other => panic!("unexpected tool end outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_errors_are_absorbed() {
        let dispatcher = dispatcher(true);
        let ctx = ToolContext::for_run(RunId::new());
        let outcomes = dispatcher
            .dispatch(
                &[
                    call("c1", "always_fails", json!({})),
                    call("c2", "delay_echo", json!({"tag": "ok"})),
                ],
                &ctx,
                &CancellationToken::new(),
                &EventBus::default(),
            )
            .await
            .unwrap();

        assert!(outcomes[0].is_failure());
        assert!(!outcomes[1].is_failure());
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_batch() {
        let dispatcher = dispatcher(true);
        let ctx = ToolContext::for_run(RunId::new());
        let cancel = CancellationToken::new();
        let events = EventBus::default();

        let calls = vec![call("c1", "delay_echo", json!({"tag": "slow", "delay_ms": 5000}))];

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = dispatcher
            .dispatch(&calls, &ctx, &cancel, &events)
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::Cancelled));
    }
}
