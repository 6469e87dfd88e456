//! Loop controller: the run state machine.
//!
//! `AwaitingInput → RunningModel → DispatchingTools → RunningModel → … →
//! AwaitingInput | Terminated`. Terminated is absorbing. Budget exhaustion
//! and cancellation are reported as structured outcomes carrying the partial
//! conversation; only a post-retry model failure escapes as an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tandem_core::config::EngineConfig;
use tandem_core::error::{Result, TandemError};
use tandem_core::event::{redact_turn, EventBus};
use tandem_core::traits::{MemoryStore, ModelClient, RunStore};
use tandem_core::types::{
    EngineEvent, RunId, RunStatus, TerminationReason, ToolContext, ToolDefinition, Turn, Visibility,
};
use tandem_tools::ToolRegistry;

use crate::budget::RunBudget;
use crate::conversation::Conversation;
use crate::dispatcher::ToolDispatcher;
use crate::executor::TurnExecutor;
use crate::window;

/// Control states of a run. Terminal states carry their reporting payload so
/// a transition into them is final by construction.
#[derive(Debug)]
pub enum LoopState {
    AwaitingInput,
    RunningModel,
    DispatchingTools,
    Terminated(TerminationReason),
}

/// What a completed run segment hands back to the caller.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub final_text: Option<String>,
    pub turns_taken: usize,
    pub turns: Vec<Turn>,
}

pub struct LoopController {
    config: EngineConfig,
    registry: Arc<ToolRegistry>,
    executor: TurnExecutor,
    dispatcher: ToolDispatcher,
    store: Option<Arc<dyn RunStore>>,
    memory: Option<Arc<dyn MemoryStore>>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

impl LoopController {
    pub fn new(
        config: EngineConfig,
        model: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
    ) -> Result<Self> {
        let window = window::from_config(&config)?;
        let executor = TurnExecutor::new(model, window);
        let dispatcher = ToolDispatcher::new(registry.clone(), config.parallel_tools);
        Ok(Self {
            config,
            registry,
            executor,
            dispatcher,
            store: None,
            memory: None,
            events: Arc::new(EventBus::default()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute one run segment: append `prompt` as a user turn, then drive
    /// the model/tool loop until it rests, terminates, or fails.
    ///
    /// With a `RunStore` attached, an existing turn log for `run_id` is
    /// loaded first and the full log is saved back on every exit path.
    pub async fn run(&self, run_id: RunId, prompt: &str) -> Result<RunOutcome> {
        let mut conversation = self.seed(&run_id).await?;
        let mut budget = RunBudget::new(self.config.max_turns);
        let deadline = Instant::now() + Duration::from_secs(self.config.max_duration_secs);
        let tools: Vec<ToolDefinition> = self.registry.definitions(true);

        let mut ctx = ToolContext::for_run(run_id.clone());
        if let Some(memory) = &self.memory {
            ctx = ctx.with_memory(memory.clone());
        }

        info!(%run_id, max_turns = self.config.max_turns, "run segment starting");
        self.events.publish(EngineEvent::RunStarted {
            run_id: run_id.clone(),
        });

        conversation.push_user(prompt)?;
        self.publish_turn(&run_id, conversation.turns().last());

        let mut state = LoopState::RunningModel;
        loop {
            state = match state {
                LoopState::RunningModel => {
                    if self.cancel.is_cancelled() {
                        LoopState::Terminated(TerminationReason::Cancelled)
                    } else if budget.is_exhausted() {
                        LoopState::Terminated(TerminationReason::BudgetExhausted)
                    } else if Instant::now() >= deadline {
                        info!(%run_id, max_duration_secs = self.config.max_duration_secs,
                            "wall-clock limit reached");
                        LoopState::Terminated(TerminationReason::BudgetExhausted)
                    } else {
                        let before = conversation.turns().len();
                        let stepped = tokio::select! {
                            _ = self.cancel.cancelled() => Err(TandemError::Cancelled),
                            res = self.executor.step(&mut conversation, &mut budget, &tools) => res,
                        };
                        match stepped {
                            Ok(response) => {
                                for turn in &conversation.turns()[before..] {
                                    self.publish_turn(&run_id, Some(turn));
                                }
                                if response.tool_calls.is_empty() {
                                    LoopState::AwaitingInput
                                } else {
                                    LoopState::DispatchingTools
                                }
                            }
                            Err(TandemError::Cancelled) => {
                                LoopState::Terminated(TerminationReason::Cancelled)
                            }
                            Err(e) => {
                                // The retry policy already ran inside the
                                // model client; what reaches here is fatal.
                                warn!(%run_id, error = %e, "model failure ends the run");
                                let reason = TerminationReason::ModelFailure {
                                    message: e.to_string(),
                                };
                                self.persist(&run_id, conversation.turns()).await;
                                self.events.publish(EngineEvent::RunTerminated {
                                    run_id: run_id.clone(),
                                    status: RunStatus::Terminated { reason },
                                    turns_taken: budget.turns_taken(),
                                });
                                return Err(e);
                            }
                        }
                    }
                }
                LoopState::DispatchingTools => {
                    let calls = conversation.pending_calls().to_vec();
                    match self
                        .dispatcher
                        .dispatch(&calls, &ctx, &self.cancel, &self.events)
                        .await
                    {
                        Ok(outcomes) => {
                            for (call, outcome) in calls.iter().zip(outcomes) {
                                conversation.push_tool_result(&call.id, outcome)?;
                                self.publish_turn(&run_id, conversation.turns().last());
                            }
                            LoopState::RunningModel
                        }
                        Err(TandemError::Cancelled) => {
                            LoopState::Terminated(TerminationReason::Cancelled)
                        }
                        Err(e) => return Err(e),
                    }
                }
                LoopState::AwaitingInput => {
                    return self
                        .finish(&run_id, conversation, &budget, RunStatus::AwaitingInput)
                        .await;
                }
                LoopState::Terminated(reason) => {
                    return self
                        .finish(
                            &run_id,
                            conversation,
                            &budget,
                            RunStatus::Terminated { reason },
                        )
                        .await;
                }
            };
        }
    }

    async fn seed(&self, run_id: &RunId) -> Result<Conversation> {
        let mut conversation = match &self.store {
            Some(store) => match store.load(run_id).await? {
                Some(turns) => Conversation::from_turns(turns)?,
                None => Conversation::new(),
            },
            None => Conversation::new(),
        };
        // A segment cancelled mid-dispatch leaves its final batch unanswered
        // in the persisted log; close it so this segment can proceed.
        if !conversation.pending_calls().is_empty() {
            info!(%run_id, pending = conversation.pending_calls().len(),
                "closing unanswered tool calls from a cancelled segment");
            conversation.close_open_batch("call interrupted before a result was produced");
        }
        Ok(conversation)
    }

    async fn finish(
        &self,
        run_id: &RunId,
        conversation: Conversation,
        budget: &RunBudget,
        status: RunStatus,
    ) -> Result<RunOutcome> {
        let final_text = conversation.last_assistant_text().map(String::from);
        let turns = conversation.into_turns();

        self.persist(run_id, &turns).await;
        info!(%run_id, ?status, turns_taken = budget.turns_taken(), "run segment over");
        self.events.publish(EngineEvent::RunTerminated {
            run_id: run_id.clone(),
            status: status.clone(),
            turns_taken: budget.turns_taken(),
        });

        Ok(RunOutcome {
            status,
            final_text,
            turns_taken: budget.turns_taken(),
            turns,
        })
    }

    async fn persist(&self, run_id: &RunId, turns: &[Turn]) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(run_id, turns.to_vec()).await {
                warn!(%run_id, error = %e, "run log save failed");
            }
        }
    }

    fn publish_turn(&self, run_id: &RunId, turn: Option<&Turn>) {
        if let Some(turn) = turn {
            let redacted = redact_turn(turn, |name| {
                self.registry
                    .visibility_of(name)
                    .unwrap_or(Visibility::Public)
            });
            self.events.publish(EngineEvent::TurnAppended {
                run_id: run_id.clone(),
                turn: redacted,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;
    use serde_json::json;
    use tandem_core::traits::Tool;
    use tandem_core::types::{ModelResponse, ToolCall, ToolFailure, ToolOutcome};
    use tandem_llm::scripted::{ClosureClient, ScriptedClient};

    use crate::store::InMemoryRunStore;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input back"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
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
            "Takes a while"
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
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(null))
            })
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(SlowTool).unwrap();
        Arc::new(registry)
    }

    fn config(max_turns: usize) -> EngineConfig {
        EngineConfig {
            max_turns,
            max_context_tokens: 0, // full history
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn text_answer_rests_awaiting_input() {
        let model = Arc::new(ScriptedClient::new().push_text("the answer"));
        let controller = LoopController::new(config(5), model, registry()).unwrap();

        let outcome = controller.run(RunId::new(), "question").await.unwrap();
        assert_eq!(outcome.status, RunStatus::AwaitingInput);
        assert_eq!(outcome.final_text.as_deref(), Some("the answer"));
        assert_eq!(outcome.turns_taken, 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_is_a_structured_outcome() {
        // A model that asks for a tool on every step never rests; the budget
        // must stop it.
        let counter = Arc::new(AtomicUsize::new(0));
        let ids = counter.clone();
        let model = Arc::new(ClosureClient::new(move |_turns| {
            let n = ids.fetch_add(1, Ordering::SeqCst);
            ModelResponse::calling(vec![ToolCall {
                id: format!("c{n}"),
                name: "echo".into(),
                arguments: json!({"n": n}),
            }])
        }));
        let controller = LoopController::new(config(3), model, registry()).unwrap();

        let outcome = controller.run(RunId::new(), "go").await.unwrap();
        assert_eq!(
            outcome.status,
            RunStatus::Terminated {
                reason: TerminationReason::BudgetExhausted
            }
        );
        assert_eq!(outcome.turns_taken, 3);
        // Partial turns are preserved: user + 3 × (call + result).
        assert_eq!(outcome.turns.len(), 7);
    }

    #[tokio::test]
    async fn unknown_tool_does_not_abort_the_run() {
        let model = Arc::new(
            ScriptedClient::new()
                .push_calls(vec![ToolCall {
                    id: "c1".into(),
                    name: "no_such_tool".into(),
                    arguments: json!({}),
                }])
                .push_text("recovered"),
        );
        let controller = LoopController::new(config(5), model, registry()).unwrap();

        let outcome = controller.run(RunId::new(), "go").await.unwrap();
        assert_eq!(outcome.status, RunStatus::AwaitingInput);
        assert_eq!(outcome.final_text.as_deref(), Some("recovered"));

        let failure = outcome.turns.iter().find_map(|t| match t {
            Turn::ToolResult {
                outcome: ToolOutcome::Failure { kind, .. },
                ..
            } => Some(*kind),
            _ => None,
        });
        assert_eq!(failure, Some(ToolFailure::UnknownTool));
    }

    #[tokio::test]
    async fn cancellation_mid_tool_terminates_promptly() {
        let model = Arc::new(ScriptedClient::new().push_calls(vec![ToolCall {
            id: "c1".into(),
            name: "slow".into(),
            arguments: json!({}),
        }]));
        let cancel = CancellationToken::new();
        let controller = LoopController::new(config(5), model, registry())
            .unwrap()
            .with_cancellation(cancel.clone());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let outcome = controller.run(RunId::new(), "go").await.unwrap();
        assert_eq!(
            outcome.status,
            RunStatus::Terminated {
                reason: TerminationReason::Cancelled
            }
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        // The unfinished tool result was discarded.
        assert!(!outcome
            .turns
            .iter()
            .any(|t| matches!(t, Turn::ToolResult { .. })));
    }

    #[tokio::test]
    async fn cancelled_run_resumes_from_the_store() {
        let store = Arc::new(InMemoryRunStore::new());
        let run_id = RunId::new();

        // First segment: cancelled while `slow` is running, so the persisted
        // log ends with an unanswered tool call.
        let model = Arc::new(ScriptedClient::new().push_calls(vec![ToolCall {
            id: "c1".into(),
            name: "slow".into(),
            arguments: json!({}),
        }]));
        let cancel = CancellationToken::new();
        let controller = LoopController::new(config(5), model, registry())
            .unwrap()
            .with_store(store.clone())
            .with_cancellation(cancel.clone());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let outcome = controller.run(run_id.clone(), "go").await.unwrap();
        assert_eq!(
            outcome.status,
            RunStatus::Terminated {
                reason: TerminationReason::Cancelled
            }
        );

        // Second segment on the same run id seeds cleanly: the open batch is
        // closed with a failure result the model can observe.
        let model = Arc::new(ScriptedClient::new().push_text("picked back up"));
        let controller = LoopController::new(config(5), model, registry())
            .unwrap()
            .with_store(store.clone());
        let outcome = controller.run(run_id, "continue").await.unwrap();

        assert_eq!(outcome.status, RunStatus::AwaitingInput);
        assert_eq!(outcome.final_text.as_deref(), Some("picked back up"));
        let closed = outcome.turns.iter().find_map(|t| match t {
            Turn::ToolResult {
                call_id,
                outcome: ToolOutcome::Failure { kind, .. },
            } => Some((call_id.clone(), *kind)),
            _ => None,
        });
        assert_eq!(closed, Some(("c1".into(), ToolFailure::ExecutionFailed)));
    }

    #[tokio::test]
    async fn wall_clock_deadline_terminates_before_any_model_turn() {
        let model = Arc::new(ScriptedClient::new().push_text("never reached"));
        let controller = LoopController::new(
            EngineConfig {
                max_turns: 5,
                max_duration_secs: 0,
                max_context_tokens: 0,
                ..EngineConfig::default()
            },
            model,
            registry(),
        )
        .unwrap();

        let outcome = controller.run(RunId::new(), "go").await.unwrap();
        assert_eq!(
            outcome.status,
            RunStatus::Terminated {
                reason: TerminationReason::BudgetExhausted
            }
        );
        // The deadline struck with the turn budget untouched.
        assert_eq!(outcome.turns_taken, 0);
    }

    #[tokio::test]
    async fn model_failure_after_retries_is_fatal() {
        let model = Arc::new(
            ScriptedClient::new().push_error(TandemError::ModelInvocation("502".into())),
        );
        let controller = LoopController::new(config(5), model, registry()).unwrap();

        let err = controller.run(RunId::new(), "go").await.unwrap_err();
        assert!(matches!(err, TandemError::ModelInvocation(_)));
    }

    #[tokio::test]
    async fn store_round_trip_resumes_a_run() {
        let store = Arc::new(InMemoryRunStore::new());
        let run_id = RunId::new();

        let first = Arc::new(ScriptedClient::new().push_text("hello"));
        let controller = LoopController::new(config(5), first, registry())
            .unwrap()
            .with_store(store.clone());
        controller.run(run_id.clone(), "hi").await.unwrap();

        // Second segment sees the persisted history.
        let second = Arc::new(ClosureClient::new(|turns| {
            ModelResponse::text_only(format!("history has {} turns", turns.len()))
        }));
        let controller = LoopController::new(config(5), second, registry())
            .unwrap()
            .with_store(store.clone());
        let outcome = controller.run(run_id, "again").await.unwrap();

        // hi, hello, again — then this segment's answer.
        assert_eq!(outcome.final_text.as_deref(), Some("history has 3 turns"));
        assert_eq!(outcome.turns.len(), 4);
    }

    #[tokio::test]
    async fn events_cover_the_whole_run() {
        let model = Arc::new(
            ScriptedClient::new()
                .push_calls(vec![ToolCall {
                    id: "c1".into(),
                    name: "echo".into(),
                    arguments: json!({"x": 1}),
                }])
                .push_text("done"),
        );
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let controller = LoopController::new(config(5), model, registry())
            .unwrap()
            .with_events(events);

        controller.run(RunId::new(), "go").await.unwrap();

        let mut saw_started = false;
        let mut saw_tool_end = false;
        let mut saw_terminated = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::RunStarted { .. } => saw_started = true,
                EngineEvent::ToolEnd { .. } => saw_tool_end = true,
                EngineEvent::RunTerminated { status, .. } => {
                    saw_terminated = true;
                    assert_eq!(status, RunStatus::AwaitingInput);
                }
                _ => {}
            }
        }
        assert!(saw_started && saw_tool_end && saw_terminated);
    }
}
