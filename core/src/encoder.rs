//! BM25 sparse vector encoding.

use crate::config::EngineConfig;
use crate::tokenizer::term_frequencies;
use crate::vocabulary::Vocabulary;
use crate::{SparseEntry, SparseVector};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: 1.5, b: 0.75 } }
}

impl From<&EngineConfig> for Bm25Params {
    fn from(cfg: &EngineConfig) -> Self { Self { k1: cfg.k1, b: cfg.b } }
}

/// Okapi BM25 term weight.
pub fn bm25_weight(idf: f64, tf: u32, doc_length: u32, avg_doc_length: f64, params: Bm25Params) -> f64 {
    let tf = tf as f64;
    let norm = 1.0 - params.b + params.b * (doc_length as f64 / avg_doc_length);
    idf * (tf * (params.k1 + 1.0)) / (tf + params.k1 * norm)
}

/// Encode `content` against `vocab`. Out-of-vocabulary terms are skipped.
/// Returns the vector sorted by term index and the document length in tokens.
pub fn compute_sparse_vector(vocab: &Vocabulary, content: &str, params: Bm25Params) -> (SparseVector, u32) {
    let (tf, doc_length) = term_frequencies(content);
    if vocab.is_empty() {
        return (Vec::new(), doc_length);
    }
    let avg = vocab.avg_doc_length();
    let mut vector: SparseVector = tf
        .iter()
        .filter_map(|(term, &count)| {
            let info = vocab.get(term)?;
            Some(SparseEntry { term_index: info.index, weight: bm25_weight(info.idf, count, doc_length, avg, params) })
        })
        .collect();
    vector.sort_unstable_by_key(|e| e.term_index);
    (vector, doc_length)
}

/// Dot product of two index-sorted sparse vectors.
pub fn dot(a: &[SparseEntry], b: &[SparseEntry]) -> f64 {
    let (mut i, mut j, mut sum) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].term_index.cmp(&b[j].term_index) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].weight * b[j].weight;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}
