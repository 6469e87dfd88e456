//! Bundled in-memory `MemoryStore`.
//!
//! Keyword scoring stands in for the vector-similarity backend, which is an
//! external collaborator behind the same trait.

use std::sync::Mutex;

use futures::future::BoxFuture;

use tandem_core::error::Result;
use tandem_core::traits::MemoryStore;

pub struct InMemoryStore {
    entries: Mutex<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of query terms appearing in the entry, case-insensitive.
fn score(entry: &str, terms: &[String]) -> usize {
    let haystack = entry.to_lowercase();
    terms.iter().filter(|t| haystack.contains(t.as_str())).count()
}

impl MemoryStore for InMemoryStore {
    fn save(&self, memory: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.entries.lock().expect("store lock").push(memory);
            Ok(())
        })
    }

    fn search(&self, query: &str, limit: usize) -> BoxFuture<'_, Result<Vec<String>>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Box::pin(async move {
            let entries = self.entries.lock().expect("store lock");
            let mut scored: Vec<(usize, &String)> = entries
                .iter()
                .map(|e| (score(e, &terms), e))
                .filter(|(s, _)| *s > 0)
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            Ok(scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
        })
    }
}
