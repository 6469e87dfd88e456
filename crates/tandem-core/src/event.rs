use crate::types::{EngineEvent, Turn, Visibility};

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events. Publishing never affects control
/// flow: send errors (no receivers, lagging receivers) are ignored.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Redact a turn for publication: private tool calls keep their name but
/// lose their arguments, so private tools never leak into external logs/UI.
pub fn redact_turn(turn: &Turn, visibility_of: impl Fn(&str) -> Visibility) -> Turn {
    match turn {
        Turn::AssistantToolCall { call } if visibility_of(&call.name) == Visibility::Private => {
            let mut redacted = call.clone();
            redacted.arguments = serde_json::Value::Null;
            Turn::AssistantToolCall { call: redacted }
        }
        other => other.clone(),
    }
}
