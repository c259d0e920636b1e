//! `HybridIndex`: the indexing service. Owns the store, the vocabulary cache
//! and the per-workspace write guards.

use crate::cache::VocabularyCache;
use crate::cancel::CancelToken;
use crate::config::{EngineConfig, SearchStrategy};
use crate::encoder::{compute_sparse_vector, Bm25Params};
use crate::error::{validate_workspace, Result};
use crate::fusion::{fuse, DenseResult, FusionParams, HybridOptions, HybridResultEntry};
use crate::inverted::{self, InvertedIndexStats};
use crate::persist::Store;
use crate::search::{self, SearchContext};
use crate::vocabulary::{compute_vocabulary, BuildSummary, Vocabulary};
use crate::{DocumentInput, SparseHit, SparseVector, SparseVectorRecord, WorkspaceStats};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;

pub struct HybridIndex {
    store: Store,
    cache: VocabularyCache,
    config: EngineConfig,
    // serializes every mutating operation of a workspace
    guards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl HybridIndex {
    pub fn new(store: Store, config: EngineConfig) -> Self {
        Self { store, cache: VocabularyCache::new(), config, guards: Mutex::new(HashMap::new()) }
    }

    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        Ok(Self::new(Store::open(path)?, config))
    }

    pub fn temporary(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(Store::temporary()?, config))
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn store(&self) -> &Store { &self.store }

    pub(crate) async fn lock_workspace(&self, workspace_id: &str) -> OwnedMutexGuard<()> {
        let guard = {
            let mut guards = self.guards.lock();
            Arc::clone(guards.entry(workspace_id.to_string()).or_default())
        };
        guard.lock_owned().await
    }

    fn params(&self) -> Bm25Params { Bm25Params::from(&self.config) }

    pub(crate) fn vocabulary(&self, workspace_id: &str) -> Result<Arc<Vocabulary>> {
        self.cache.get_or_load(&self.store, workspace_id, self.config.default_avg_doc_length)
    }

    pub fn invalidate_cache(&self, workspace_id: &str) { self.cache.invalidate(workspace_id); }

    pub fn workspace_stats(&self, workspace_id: &str) -> Result<Option<WorkspaceStats>> {
        validate_workspace(workspace_id)?;
        self.store.load_stats(workspace_id)
    }

    pub fn vocabulary_size(&self, workspace_id: &str) -> Result<usize> {
        validate_workspace(workspace_id)?;
        Ok(self.vocabulary(workspace_id)?.len())
    }

    /// Replace the workspace vocabulary with one derived from `documents`.
    pub async fn build_vocabulary(&self, workspace_id: &str, documents: &[DocumentInput]) -> Result<BuildSummary> {
        validate_workspace(workspace_id)?;
        let _guard = self.lock_workspace(workspace_id).await;
        self.build_vocabulary_locked(workspace_id, documents)
    }

    /// Also drops the workspace's sparse vectors and postings: they hold term
    /// indices of the replaced vocabulary and must be indexed again.
    pub(crate) fn build_vocabulary_locked(&self, workspace_id: &str, documents: &[DocumentInput]) -> Result<BuildSummary> {
        let previous = self.store.load_stats(workspace_id)?;
        let (entries, stats) = compute_vocabulary(workspace_id, documents, previous.as_ref(), self.config.default_avg_doc_length)?;
        self.store.replace_vocabulary(workspace_id, &entries, &stats)?;
        self.cache.invalidate(workspace_id);
        info!(
            workspace_id,
            vocabulary_size = stats.vocabulary_size,
            total_documents = stats.total_documents,
            avg_doc_length = stats.avg_doc_length,
            generation = stats.generation,
            "vocabulary built"
        );
        Ok(BuildSummary {
            vocabulary_size: stats.vocabulary_size,
            total_documents: stats.total_documents,
            avg_doc_length: stats.avg_doc_length,
            generation: stats.generation,
        })
    }

    /// BM25 sparse vector of `content` against the current workspace vocabulary.
    pub fn compute_sparse_vector(&self, workspace_id: &str, content: &str) -> Result<SparseVector> {
        validate_workspace(workspace_id)?;
        let vocab = self.vocabulary(workspace_id)?;
        Ok(compute_sparse_vector(&vocab, content, self.params()).0)
    }

    fn record(&self, workspace_id: &str, vocab: &Vocabulary, doc: &DocumentInput) -> SparseVectorRecord {
        let (vector, doc_length) = compute_sparse_vector(vocab, &doc.content, self.params());
        SparseVectorRecord {
            workspace_id: workspace_id.to_string(),
            vector_store_id: doc.vector_store_id.clone(),
            vector,
            doc_length,
            metadata: doc.metadata.clone(),
        }
    }

    /// Upsert one document's sparse vector and its postings.
    pub async fn index_document(&self, workspace_id: &str, doc: &DocumentInput) -> Result<()> {
        validate_workspace(workspace_id)?;
        let _guard = self.lock_workspace(workspace_id).await;
        let vocab = self.vocabulary(workspace_id)?;
        let record = self.record(workspace_id, &vocab, doc);
        self.store.upsert_sparse(&record)?;
        inverted::update(&self.store, &vocab, &record)?;
        tracing::debug!(workspace_id, vector_store_id = %doc.vector_store_id, terms = record.vector.len(), "document indexed");
        Ok(())
    }

    /// Upsert many documents in chunks of `batch_size`. A failure leaves earlier
    /// chunks committed.
    pub async fn batch_index_documents(&self, workspace_id: &str, docs: &[DocumentInput]) -> Result<usize> {
        validate_workspace(workspace_id)?;
        let _guard = self.lock_workspace(workspace_id).await;
        let vocab = self.vocabulary(workspace_id)?;
        let mut indexed = 0;
        for chunk in docs.chunks(self.config.batch_size.max(1)) {
            indexed += self.index_chunk_locked(workspace_id, &vocab, chunk)?;
        }
        info!(workspace_id, indexed, "batch indexed");
        Ok(indexed)
    }

    pub(crate) fn index_chunk_locked(&self, workspace_id: &str, vocab: &Vocabulary, chunk: &[DocumentInput]) -> Result<usize> {
        let records: Vec<SparseVectorRecord> = chunk.iter().map(|d| self.record(workspace_id, vocab, d)).collect();
        self.store.upsert_sparse_batch(&records)?;
        inverted::batch_update(&self.store, vocab, workspace_id, &records)?;
        Ok(records.len())
    }

    /// Remove documents from the sparse store and the inverted index.
    pub async fn remove_from_index(&self, workspace_id: &str, ids: &[String]) -> Result<usize> {
        validate_workspace(workspace_id)?;
        let _guard = self.lock_workspace(workspace_id).await;
        let postings = inverted::remove(&self.store, workspace_id, ids)?;
        self.store.delete_sparse(workspace_id, ids)?;
        info!(workspace_id, documents = ids.len(), postings, "removed from index");
        Ok(postings)
    }

    /// Rebuild the inverted index from every stored sparse vector.
    pub async fn build_inverted_index(&self, workspace_id: &str) -> Result<InvertedIndexStats> {
        validate_workspace(workspace_id)?;
        let _guard = self.lock_workspace(workspace_id).await;
        let vocab = self.vocabulary(workspace_id)?;
        inverted::build(&self.store, &vocab, workspace_id)
    }

    pub fn inverted_index_stats(&self, workspace_id: &str) -> Result<InvertedIndexStats> {
        validate_workspace(workspace_id)?;
        inverted::stats(&self.store, workspace_id)
    }

    /// Sparse search with the configured strategy and fallback policy.
    pub fn search_sparse(&self, workspace_id: &str, query: &str, limit: usize) -> Result<Vec<SparseHit>> {
        self.search_sparse_with(workspace_id, query, limit, self.config.strategy, &CancelToken::new())
    }

    pub fn search_sparse_with(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
        strategy: SearchStrategy,
        cancel: &CancelToken,
    ) -> Result<Vec<SparseHit>> {
        validate_workspace(workspace_id)?;
        let vocab = self.vocabulary(workspace_id)?;
        let ctx = SearchContext {
            store: &self.store,
            vocab: &vocab,
            workspace_id,
            params: self.params(),
            batch_size: self.config.batch_size,
            cancel,
        };
        search::search(&ctx, query, limit, strategy, self.config.fallback)
    }

    /// Fuse externally supplied dense results with `limit * 2` sparse candidates.
    pub fn hybrid_search(&self, workspace_id: &str, query: &str, dense: &[DenseResult], options: HybridOptions) -> Result<Vec<HybridResultEntry>> {
        let sparse = self.search_sparse(workspace_id, query, options.limit.saturating_mul(2))?;
        let params = FusionParams {
            rrf_k: self.config.rrf_k,
            alpha: options.alpha.unwrap_or(self.config.default_alpha),
            boost_threshold: self.config.boost_threshold,
        };
        let fused = fuse(dense, &sparse, params, options.limit);
        tracing::debug!(workspace_id, dense = dense.len(), sparse = sparse.len(), fused = fused.len(), "hybrid search");
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexError;

    fn docs() -> Vec<DocumentInput> {
        vec![
            DocumentInput::new("a", "cat dog"),
            DocumentInput::new("b", "dog bird"),
            DocumentInput::new("c", "cat cat bird"),
        ]
    }

    #[tokio::test]
    async fn build_then_index_then_search() {
        let engine = HybridIndex::temporary(EngineConfig::default()).unwrap();
        let summary = engine.build_vocabulary("ws", &docs()).await.unwrap();
        assert_eq!(summary.vocabulary_size, 3);
        assert_eq!(summary.total_documents, 3);
        assert_eq!(engine.batch_index_documents("ws", &docs()).await.unwrap(), 3);

        let hits = engine.search_sparse("ws", "cat", 10).unwrap();
        assert_eq!(hits[0].vector_store_id, "c");
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn never_built_workspace_is_degraded_not_broken() {
        let engine = HybridIndex::temporary(EngineConfig::default()).unwrap();
        engine.index_document("ws", &DocumentInput::new("a", "some text")).await.unwrap();
        assert!(engine.compute_sparse_vector("ws", "some text").unwrap().is_empty());
        assert!(engine.search_sparse("ws", "text", 10).unwrap().is_empty());
        assert!(engine.workspace_stats("ws").unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_bad_workspace_ids() {
        let engine = HybridIndex::temporary(EngineConfig::default()).unwrap();
        assert!(matches!(engine.search_sparse("", "x", 1), Err(IndexError::InvalidWorkspace(_))));
        assert!(matches!(engine.build_vocabulary("a\0b", &[]).await, Err(IndexError::InvalidWorkspace(_))));
    }

    #[tokio::test]
    async fn build_invalidates_cached_vocabulary() {
        let engine = HybridIndex::temporary(EngineConfig::default()).unwrap();
        engine.build_vocabulary("ws", &docs()).await.unwrap();
        assert_eq!(engine.vocabulary_size("ws").unwrap(), 3);
        engine.build_vocabulary("ws", &[DocumentInput::new("z", "zebra")]).await.unwrap();
        assert_eq!(engine.vocabulary_size("ws").unwrap(), 1);
    }

    #[tokio::test]
    async fn vocabulary_rebuild_leaves_no_stale_postings() {
        let engine = HybridIndex::temporary(EngineConfig::default()).unwrap();
        let first = vec![DocumentInput::new("a", "rust tokio"), DocumentInput::new("b", "python django")];
        engine.build_vocabulary("ws", &first).await.unwrap();
        engine.batch_index_documents("ws", &first).await.unwrap();

        let second = vec![DocumentInput::new("b", "rust python")];
        engine.build_vocabulary("ws", &second).await.unwrap();
        engine.batch_index_documents("ws", &second).await.unwrap();

        let cancel = CancelToken::new();
        let scan = engine.search_sparse_with("ws", "rust", 10, SearchStrategy::FullScan, &cancel).unwrap();
        let inv = engine.search_sparse_with("ws", "rust", 10, SearchStrategy::InvertedIndex, &cancel).unwrap();
        let ids = |hits: &[SparseHit]| hits.iter().map(|h| h.vector_store_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&scan), vec!["b".to_string()]);
        assert_eq!(ids(&inv), vec!["b".to_string()]);
        assert!(engine.store().load_sparse("ws", "a").unwrap().is_none());
        assert_eq!(engine.inverted_index_stats("ws").unwrap().document_count, 1);
    }
}
