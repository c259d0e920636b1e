//! Sparse (keyword) search: full scan over stored vectors, or through the
//! inverted index with a configurable fallback.

use crate::cancel::CancelToken;
use crate::config::{FallbackPolicy, SearchStrategy};
use crate::encoder::{compute_sparse_vector, dot, Bm25Params};
use crate::error::{IndexError, Result};
use crate::inverted;
use crate::persist::Store;
use crate::vocabulary::Vocabulary;
use crate::SparseHit;

pub struct SearchContext<'a> {
    pub store: &'a Store,
    pub vocab: &'a Vocabulary,
    pub workspace_id: &'a str,
    pub params: Bm25Params,
    /// Records scored between cancellation checks.
    pub batch_size: usize,
    pub cancel: &'a CancelToken,
}

/// Dot product of the BM25 query vector against every stored vector.
pub fn full_scan(ctx: &SearchContext<'_>, query: &str, limit: usize) -> Result<Vec<SparseHit>> {
    ctx.cancel.check()?;
    let (query_vec, _) = compute_sparse_vector(ctx.vocab, query, ctx.params);
    if query_vec.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let mut hits: Vec<SparseHit> = Vec::new();
    for (i, record) in ctx.store.iter_sparse(ctx.workspace_id).enumerate() {
        if i % ctx.batch_size.max(1) == 0 {
            ctx.cancel.check()?;
        }
        let record = record?;
        let score = dot(&query_vec, &record.vector);
        if score > 0.0 {
            hits.push(SparseHit { vector_store_id: record.vector_store_id, score, metadata: record.metadata });
        }
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.vector_store_id.cmp(&b.vector_store_id)));
    hits.truncate(limit);
    Ok(hits)
}

/// Inverted-index search; metadata is loaded for the returned hits only.
pub fn optimized(ctx: &SearchContext<'_>, query: &str, limit: usize) -> Result<Vec<SparseHit>> {
    ctx.cancel.check()?;
    if limit == 0 {
        return Ok(Vec::new());
    }
    let scored = inverted::search_optimized(ctx.store, ctx.vocab, ctx.workspace_id, query, limit)?;
    let mut hits = Vec::with_capacity(scored.len());
    for (id, score) in scored {
        let metadata = ctx.store.load_sparse(ctx.workspace_id, &id)?.map(|r| r.metadata).unwrap_or_default();
        hits.push(SparseHit { vector_store_id: id, score, metadata });
    }
    ctx.cancel.check()?;
    Ok(hits)
}

pub fn search(ctx: &SearchContext<'_>, query: &str, limit: usize, strategy: SearchStrategy, fallback: FallbackPolicy) -> Result<Vec<SparseHit>> {
    match strategy {
        SearchStrategy::FullScan => full_scan(ctx, query, limit),
        SearchStrategy::InvertedIndex => match optimized(ctx, query, limit) {
            Ok(hits) => Ok(hits),
            Err(IndexError::Cancelled) => Err(IndexError::Cancelled),
            Err(err) => match fallback {
                FallbackPolicy::FailFast => Err(err),
                FallbackPolicy::FallbackToFullScan => {
                    tracing::warn!(workspace_id = ctx.workspace_id, error = %err, "inverted index search failed, falling back to full scan");
                    full_scan(ctx, query, limit)
                }
            },
        },
    }
}
