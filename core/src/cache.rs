use crate::error::Result;
use crate::persist::Store;
use crate::vocabulary::Vocabulary;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-through per-workspace cache of vocabulary + stats. Entries never
/// expire; a vocabulary build must call `invalidate`.
#[derive(Default)]
pub struct VocabularyCache {
    state: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Arc<Vocabulary>>,
    // bumped by every invalidate; a fill started under an older epoch is dropped
    epochs: HashMap<String, u64>,
}

impl VocabularyCache {
    pub fn new() -> Self { Self::default() }

    pub fn get_or_load(&self, store: &Store, workspace_id: &str, default_avg_doc_length: f64) -> Result<Arc<Vocabulary>> {
        let epoch = {
            let state = self.state.read();
            if let Some(v) = state.entries.get(workspace_id) {
                return Ok(Arc::clone(v));
            }
            state.epochs.get(workspace_id).copied().unwrap_or(0)
        };
        let stats = store.load_stats(workspace_id)?;
        let Some(stats) = stats else {
            // never built: degraded but valid, and not cached so a later build is seen
            return Ok(Arc::new(Vocabulary::empty(default_avg_doc_length)));
        };
        let entries = store.load_vocabulary(workspace_id)?;
        let vocab = Arc::new(Vocabulary::from_entries(entries, Some(stats), default_avg_doc_length));
        tracing::debug!(workspace_id, terms = vocab.len(), "vocabulary loaded");
        self.fill(workspace_id, epoch, &vocab);
        Ok(vocab)
    }

    fn fill(&self, workspace_id: &str, epoch: u64, vocab: &Arc<Vocabulary>) -> bool {
        let mut state = self.state.write();
        if state.epochs.get(workspace_id).copied().unwrap_or(0) != epoch {
            return false;
        }
        state.entries.insert(workspace_id.to_string(), Arc::clone(vocab));
        true
    }

    pub fn invalidate(&self, workspace_id: &str) {
        let mut state = self.state.write();
        state.entries.remove(workspace_id);
        *state.epochs.entry(workspace_id.to_string()).or_insert(0) += 1;
    }

    pub fn contains(&self, workspace_id: &str) -> bool { self.state.read().entries.contains_key(workspace_id) }
}
