//! Deterministic model clients for tests and offline runs.
//!
//! `ScriptedClient` replays a queued sequence of responses; `ClosureClient`
//! computes each response as a pure function of the conversation view, which
//! makes executor idempotence observable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use tandem_core::error::{Result, TandemError};
use tandem_core::traits::ModelClient;
use tandem_core::types::*;

enum ScriptedStep {
    Respond(ModelResponse),
    Fail(TandemError),
}

/// Replays a fixed script of responses, one per invocation.
/// An exhausted script fails with `ModelInvocation`.
pub struct ScriptedClient {
    steps: Mutex<VecDeque<ScriptedStep>>,
    structured: Mutex<VecDeque<serde_json::Value>>,
    invocations: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            structured: Mutex::new(VecDeque::new()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn push_text(self, text: impl Into<String>) -> Self {
        self.steps
            .lock()
            .expect("script lock")
            .push_back(ScriptedStep::Respond(ModelResponse::text_only(text)));
        self
    }

    pub fn push_calls(self, calls: Vec<ToolCall>) -> Self {
        self.steps
            .lock()
            .expect("script lock")
            .push_back(ScriptedStep::Respond(ModelResponse::calling(calls)));
        self
    }

    pub fn push_response(self, response: ModelResponse) -> Self {
        self.steps
            .lock()
            .expect("script lock")
            .push_back(ScriptedStep::Respond(response));
        self
    }

    pub fn push_error(self, error: TandemError) -> Self {
        self.steps
            .lock()
            .expect("script lock")
            .push_back(ScriptedStep::Fail(error));
        self
    }

    pub fn push_structured(self, value: serde_json::Value) -> Self {
        self.structured
            .lock()
            .expect("script lock")
            .push_back(value);
        self
    }

    /// Number of `invoke` calls made so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelClient for ScriptedClient {
    fn invoke(
        &self,
        _turns: Vec<Turn>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().expect("script lock").pop_front();
            match step {
                Some(ScriptedStep::Respond(resp)) => Ok(resp),
                Some(ScriptedStep::Fail(e)) => Err(e),
                None => Err(TandemError::ModelInvocation("script exhausted".into())),
            }
        })
    }

    fn invoke_structured(
        &self,
        _turns: Vec<Turn>,
        schema: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let value = self.structured.lock().expect("script lock").pop_front();
            match value {
                Some(v) => {
                    tandem_core::schema::validate(&schema, &v)
                        .map_err(TandemError::SchemaValidation)?;
                    Ok(v)
                }
                None => Err(TandemError::ModelInvocation(
                    "structured script exhausted".into(),
                )),
            }
        })
    }
}

type ResponseFn = dyn Fn(&[Turn]) -> ModelResponse + Send + Sync;

/// Computes every response as a pure function of the conversation view.
pub struct ClosureClient {
    f: Box<ResponseFn>,
}

impl ClosureClient {
    pub fn new(f: impl Fn(&[Turn]) -> ModelResponse + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl ModelClient for ClosureClient {
    fn invoke(
        &self,
        turns: Vec<Turn>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move { Ok((self.f)(&turns)) })
    }

    fn invoke_structured(
        &self,
        turns: Vec<Turn>,
        _schema: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let resp = (self.f)(&turns);
            match resp.text {
                Some(text) => serde_json::from_str(&text)
                    .map_err(|e| TandemError::ModelParse(e.to_string())),
                None => Err(TandemError::ModelParse("no text to parse".into())),
            }
        })
    }
}
