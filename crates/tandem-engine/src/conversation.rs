//! Append-only conversation state.
//!
//! Owned exclusively by the single control thread of a run. The structure
//! enforces the batch invariants at the append boundary: every tool-call
//! batch must be fully answered, in request order, before any other turn
//! kind may follow.

use std::collections::HashSet;

use tandem_core::error::{Result, TandemError};
use tandem_core::types::{ModelResponse, ToolCall, ToolFailure, ToolOutcome, Turn};

#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    /// Calls from the latest model step still awaiting results, in request
    /// order. Results must arrive front-to-back.
    pending: Vec<ToolCall>,
    seen_call_ids: HashSet<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild conversation state from a persisted turn log, revalidating
    /// every invariant. Fails with `Conversation` if the log is malformed.
    pub fn from_turns(turns: Vec<Turn>) -> Result<Self> {
        let mut conversation = Self::new();
        for turn in turns {
            match turn {
                Turn::User { text } => conversation.push_user(text)?,
                Turn::AssistantText { text } => {
                    conversation.require_no_pending("assistant_text")?;
                    conversation.turns.push(Turn::assistant_text(text));
                }
                Turn::AssistantToolCall { call } => {
                    // Calls may extend the current batch only while no result
                    // has arrived yet; a log interleaving calls and results
                    // within one batch is malformed.
                    if !conversation.pending.is_empty()
                        && matches!(conversation.turns.last(), Some(Turn::ToolResult { .. }))
                    {
                        return Err(TandemError::Conversation(format!(
                            "tool call '{}' interleaved with results of an open batch",
                            call.id
                        )));
                    }
                    conversation.register_call(call)?;
                }
                Turn::ToolResult { call_id, outcome } => {
                    conversation.push_tool_result(&call_id, outcome)?;
                }
            }
        }
        Ok(conversation)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    /// Tool calls awaiting results, in request order.
    pub fn pending_calls(&self) -> &[ToolCall] {
        &self.pending
    }

    /// The most recent assistant text, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::AssistantText { text } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> Result<()> {
        self.require_no_pending("user")?;
        self.turns.push(Turn::user(text));
        Ok(())
    }

    /// Append one model step atomically: optional text turn first, then one
    /// tool-call turn per request. Validation happens before any append, so a
    /// rejected step leaves the conversation untouched.
    pub fn push_model_step(&mut self, response: &ModelResponse) -> Result<()> {
        self.require_no_pending("assistant")?;

        let mut batch_ids = HashSet::new();
        for call in &response.tool_calls {
            if self.seen_call_ids.contains(&call.id) || !batch_ids.insert(call.id.clone()) {
                return Err(TandemError::Conversation(format!(
                    "duplicate tool call id '{}'",
                    call.id
                )));
            }
        }

        if let Some(text) = &response.text {
            self.turns.push(Turn::assistant_text(text.clone()));
        }
        for call in &response.tool_calls {
            self.seen_call_ids.insert(call.id.clone());
            self.turns.push(Turn::tool_call(call.clone()));
            self.pending.push(call.clone());
        }
        Ok(())
    }

    /// Append the result for the next pending call. Results must arrive in
    /// request order and reference the front of the pending batch.
    pub fn push_tool_result(&mut self, call_id: &str, outcome: ToolOutcome) -> Result<()> {
        match self.pending.first() {
            Some(front) if front.id == call_id => {
                self.pending.remove(0);
                self.turns.push(Turn::tool_result(call_id, outcome));
                Ok(())
            }
            Some(front) => Err(TandemError::Conversation(format!(
                "tool result '{call_id}' out of order; expected '{}'",
                front.id
            ))),
            None => Err(TandemError::Conversation(format!(
                "tool result '{call_id}' has no matching pending call"
            ))),
        }
    }

    /// Answer every pending call with a failure result, in request order.
    ///
    /// A run cancelled mid-dispatch persists a log ending in an unanswered
    /// batch; closing it lets the next segment append a user turn and lets
    /// the model observe that those calls never produced results.
    pub fn close_open_batch(&mut self, message: &str) {
        for call in self.pending.drain(..) {
            self.turns.push(Turn::tool_result(
                call.id,
                ToolOutcome::failure(ToolFailure::ExecutionFailed, message),
            ));
        }
    }

    fn register_call(&mut self, call: ToolCall) -> Result<()> {
        if self.seen_call_ids.contains(&call.id) {
            return Err(TandemError::Conversation(format!(
                "duplicate tool call id '{}'",
                call.id
            )));
        }
        self.seen_call_ids.insert(call.id.clone());
        self.turns.push(Turn::tool_call(call.clone()));
        self.pending.push(call);
        Ok(())
    }

    fn require_no_pending(&self, kind: &str) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(TandemError::Conversation(format!(
                "cannot append {kind} turn with {} tool call(s) unanswered",
                self.pending.len()
            )))
        }
    }
}
