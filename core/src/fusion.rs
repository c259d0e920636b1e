//! Reciprocal Rank Fusion of dense (semantic) and sparse (keyword) results.
//!
//! `score(d) = alpha / (k + denseRank) + (1 - alpha) * boost / (k + sparseRank)`
//!
//! where ranks are 1-indexed and a missing rank contributes nothing. `boost`
//! is 1 except for sparse-only hits whose score, normalized by the best
//! sparse-only score, reaches the boost threshold: it then grows linearly to 2
//! at a normalized score of 1.

use crate::{DocMetadata, SparseHit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const RRF_K: f64 = 60.0;

/// A nearest-neighbor hit from the dense vector store, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseResult {
    pub vector_store_id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub metadata: DocMetadata,
}

impl DenseResult {
    pub fn new(vector_store_id: impl Into<String>, score: f64) -> Self {
        Self { vector_store_id: vector_store_id.into(), score, metadata: DocMetadata::default() }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.metadata.source_id = Some(source_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridOptions {
    pub limit: usize,
    /// Dense weight; the engine default applies when unset.
    pub alpha: Option<f64>,
}

impl Default for HybridOptions {
    fn default() -> Self { Self { limit: 10, alpha: None } }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub rrf_k: f64,
    pub alpha: f64,
    pub boost_threshold: f64,
}

impl Default for FusionParams {
    fn default() -> Self { Self { rrf_k: RRF_K, alpha: 0.5, boost_threshold: 0.5 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridResultEntry {
    /// Join key: `metadata.source_id`, else the vector store id.
    pub id: String,
    pub vector_store_id: String,
    pub rrf_score: f64,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
    pub dense_score: Option<f64>,
    pub sparse_score: Option<f64>,
    pub normalized_sparse_score: Option<f64>,
    pub boost: f64,
}

impl HybridResultEntry {
    fn new(id: &str, vector_store_id: &str) -> Self {
        Self {
            id: id.to_string(),
            vector_store_id: vector_store_id.to_string(),
            rrf_score: 0.0,
            dense_rank: None,
            sparse_rank: None,
            dense_score: None,
            sparse_score: None,
            normalized_sparse_score: None,
            boost: 1.0,
        }
    }
}

/// Boost factor for a sparse-only hit with the given normalized score.
pub fn sparse_boost(normalized: f64, threshold: f64) -> f64 {
    if normalized < threshold || threshold >= 1.0 {
        return 1.0;
    }
    1.0 + ((normalized - threshold) / (1.0 - threshold)).min(1.0)
}

pub fn fuse(dense: &[DenseResult], sparse: &[SparseHit], params: FusionParams, limit: usize) -> Vec<HybridResultEntry> {
    let alpha = params.alpha.clamp(0.0, 1.0);
    let mut entries: Vec<HybridResultEntry> = Vec::with_capacity(dense.len() + sparse.len());
    let mut by_key: HashMap<&str, usize> = HashMap::new();

    for (i, d) in dense.iter().enumerate() {
        let key = d.metadata.join_key(&d.vector_store_id);
        let slot = *by_key.entry(key).or_insert_with(|| {
            entries.push(HybridResultEntry::new(key, &d.vector_store_id));
            entries.len() - 1
        });
        let e = &mut entries[slot];
        // first occurrence is the best rank
        if e.dense_rank.is_none() {
            e.dense_rank = Some(i + 1);
            e.dense_score = Some(d.score);
        }
    }
    for (i, s) in sparse.iter().enumerate() {
        let key = s.metadata.join_key(&s.vector_store_id);
        let slot = *by_key.entry(key).or_insert_with(|| {
            entries.push(HybridResultEntry::new(key, &s.vector_store_id));
            entries.len() - 1
        });
        let e = &mut entries[slot];
        if e.sparse_rank.is_none() {
            e.sparse_rank = Some(i + 1);
            e.sparse_score = Some(s.score);
        }
    }

    let max_sparse_only = entries
        .iter()
        .filter(|e| e.dense_rank.is_none())
        .filter_map(|e| e.sparse_score)
        .fold(0.0f64, f64::max);

    for e in &mut entries {
        let mut score = 0.0;
        if let Some(rank) = e.dense_rank {
            score += alpha / (params.rrf_k + rank as f64);
        }
        if let Some(rank) = e.sparse_rank {
            let mut contribution = (1.0 - alpha) / (params.rrf_k + rank as f64);
            if e.dense_rank.is_none() && max_sparse_only > 0.0 {
                let normalized = e.sparse_score.unwrap_or(0.0) / max_sparse_only;
                e.normalized_sparse_score = Some(normalized);
                e.boost = sparse_boost(normalized, params.boost_threshold);
                contribution *= e.boost;
            }
            score += contribution;
        }
        e.rrf_score = score;
    }

    entries.sort_by(|a, b| b.rrf_score.total_cmp(&a.rrf_score).then_with(|| a.id.cmp(&b.id)));
    entries.truncate(limit);
    entries
}
