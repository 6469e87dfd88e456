//! Bundled in-memory `RunStore`.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use tandem_core::error::Result;
use tandem_core::traits::RunStore;
use tandem_core::types::{RunId, Turn};

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<RunId, Vec<Turn>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn load(&self, run_id: &RunId) -> BoxFuture<'_, Result<Option<Vec<Turn>>>> {
        let run_id = run_id.clone();
        Box::pin(async move {
            Ok(self.runs.lock().expect("store lock").get(&run_id).cloned())
        })
    }

    fn save(&self, run_id: &RunId, turns: Vec<Turn>) -> BoxFuture<'_, Result<()>> {
        let run_id = run_id.clone();
        Box::pin(async move {
            self.runs.lock().expect("store lock").insert(run_id, turns);
            Ok(())
        })
    }
}
