//! Context-window strategies.
//!
//! The turn executor asks a `ContextWindow` for the conversation view it
//! sends to the model. `FullHistory` sends everything; `TokenBudget` keeps a
//! suffix that fits a token ceiling, snapped so a tool result is never sent
//! without its originating call.

use tandem_core::config::EngineConfig;
use tandem_core::error::{Result, TandemError};
use tandem_core::types::Turn;
use tiktoken_rs::CoreBPE;

pub trait ContextWindow: Send + Sync {
    /// Select the view of the conversation sent to the model.
    fn view(&self, turns: &[Turn]) -> Vec<Turn>;
}

/// Send the entire conversation every time.
pub struct FullHistory;

impl ContextWindow for FullHistory {
    fn view(&self, turns: &[Turn]) -> Vec<Turn> {
        turns.to_vec()
    }
}

/// Keep the longest suffix of the conversation that fits `max_tokens`,
/// always retaining at least the last `tail` turns.
pub struct TokenBudget {
    max_tokens: usize,
    tail: usize,
    bpe: CoreBPE,
}

impl TokenBudget {
    pub fn new(max_tokens: usize, tail: usize) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| TandemError::Config(format!("tokenizer init failed: {e}")))?;
        Ok(Self {
            max_tokens,
            tail,
            bpe,
        })
    }

    fn turn_tokens(&self, turn: &Turn) -> usize {
        let text = serde_json::to_string(turn).unwrap_or_default();
        self.bpe.encode_with_special_tokens(&text).len()
    }
}

/// Whether a view may start at `i` without splitting a call batch: a tool
/// result needs its originating call, and a call that extends a batch needs
/// the batch's first call.
fn batch_safe(turns: &[Turn], i: usize) -> bool {
    match turns[i] {
        Turn::ToolResult { .. } => false,
        Turn::AssistantToolCall { .. } => {
            i == 0 || !matches!(turns[i - 1], Turn::AssistantToolCall { .. })
        }
        _ => true,
    }
}

impl ContextWindow for TokenBudget {
    fn view(&self, turns: &[Turn]) -> Vec<Turn> {
        if turns.is_empty() {
            return Vec::new();
        }

        // Walk backwards until the budget is spent, but never drop into the
        // guaranteed tail.
        let tail_start = turns.len().saturating_sub(self.tail);
        let mut start = turns.len();
        let mut spent = 0usize;
        while start > 0 {
            let cost = self.turn_tokens(&turns[start - 1]);
            if spent + cost > self.max_tokens && start <= tail_start {
                break;
            }
            if spent + cost > self.max_tokens && start > tail_start {
                // Tail turns are kept even past the budget.
                start -= 1;
                continue;
            }
            spent += cost;
            start -= 1;
        }

        // Snap to a batch-safe boundary so the model never sees a tool
        // result without its originating call. Prefer the next safe turn
        // ahead; when the whole suffix sits inside one batch, widen back to
        // the batch's first call instead of sending nothing.
        start = match (start..turns.len()).find(|&i| batch_safe(turns, i)) {
            Some(i) => i,
            None => {
                let mut i = start.min(turns.len() - 1);
                while i > 0 && !batch_safe(turns, i) {
                    i -= 1;
                }
                i
            }
        };

        turns[start..].to_vec()
    }
}

/// Build the window strategy an `EngineConfig` asks for.
/// `max_context_tokens = 0` disables windowing.
pub fn from_config(config: &EngineConfig) -> Result<Box<dyn ContextWindow>> {
    if config.max_context_tokens == 0 {
        Ok(Box::new(FullHistory))
    } else {
        Ok(Box::new(TokenBudget::new(
            config.max_context_tokens,
            config.window_tail,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_core::types::{ToolCall, ToolOutcome};

    fn long_user(i: usize) -> Turn {
        Turn::user(format!("message {i} {}", "lorem ipsum ".repeat(50)))
    }

    #[test]
    fn full_history_passes_everything() {
        let turns = vec![Turn::user("a"), Turn::assistant_text("b")];
        assert_eq!(FullHistory.view(&turns), turns);
    }

    #[test]
    fn token_budget_keeps_a_suffix() {
        let window = TokenBudget::new(300, 2).unwrap();
        let turns: Vec<Turn> = (0..10).map(long_user).collect();

        let view = window.view(&turns);
        assert!(view.len() < turns.len());
        // The view is a suffix: its last turn is the conversation's last turn.
        assert_eq!(view.last(), turns.last());
    }

    #[test]
    fn tail_survives_a_tiny_budget() {
        let window = TokenBudget::new(1, 3).unwrap();
        let turns: Vec<Turn> = (0..10).map(long_user).collect();

        let view = window.view(&turns);
        assert_eq!(view.len(), 3);
        assert_eq!(view.last(), turns.last());
    }

    #[test]
    fn never_strands_a_tool_result() {
        // Tail of 2 would start the view at the tool result; the window must
        // snap past it.
        let window = TokenBudget::new(1, 2).unwrap();
        let turns = vec![
            Turn::user("start"),
            Turn::tool_call(ToolCall {
                id: "c1".into(),
                name: "echo".into(),
                arguments: json!({}),
            }),
            Turn::tool_result("c1", ToolOutcome::success(json!("ok"))),
            Turn::assistant_text("done"),
        ];

        let view = window.view(&turns);
        assert_eq!(view, vec![Turn::assistant_text("done")]);
    }

    #[test]
    fn never_splits_a_two_call_batch() {
        // A tail of 3 would start the view at the second call of the batch,
        // stranding result c1; the window must widen back to the first call.
        let window = TokenBudget::new(1, 3).unwrap();
        let turns = vec![
            Turn::user("start"),
            Turn::tool_call(ToolCall {
                id: "c1".into(),
                name: "echo".into(),
                arguments: json!({}),
            }),
            Turn::tool_call(ToolCall {
                id: "c2".into(),
                name: "echo".into(),
                arguments: json!({}),
            }),
            Turn::tool_result("c1", ToolOutcome::success(json!(1))),
            Turn::tool_result("c2", ToolOutcome::success(json!(2))),
        ];

        let view = window.view(&turns);
        assert_eq!(view, turns[1..].to_vec());
    }

    #[test]
    fn mid_batch_boundary_snaps_forward_when_a_safe_turn_follows() {
        let window = TokenBudget::new(1, 4).unwrap();
        let turns = vec![
            Turn::user("start"),
            Turn::tool_call(ToolCall {
                id: "c1".into(),
                name: "echo".into(),
                arguments: json!({}),
            }),
            Turn::tool_call(ToolCall {
                id: "c2".into(),
                name: "echo".into(),
                arguments: json!({}),
            }),
            Turn::tool_result("c1", ToolOutcome::success(json!(1))),
            Turn::tool_result("c2", ToolOutcome::success(json!(2))),
            Turn::assistant_text("done"),
        ];

        let view = window.view(&turns);
        assert_eq!(view, vec![Turn::assistant_text("done")]);
    }

    #[test]
    fn from_config_zero_budget_is_full_history() {
        let config = EngineConfig {
            max_context_tokens: 0,
            ..EngineConfig::default()
        };
        let window = from_config(&config).unwrap();
        let turns = vec![Turn::user("a")];
        assert_eq!(window.view(&turns).len(), 1);
    }
}
