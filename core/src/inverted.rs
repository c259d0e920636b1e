//! Persisted inverted index: term -> postings of (vectorStoreId, BM25 weight).
//!
//! Invariants kept by every operation here:
//! - a document's previous postings are purged before its new ones are appended,
//!   and both land in the same atomic batch;
//! - `document_frequency` equals `postings.len()` for every stored entry;
//! - term indices are resolved through one reverse map per call.

use crate::error::Result;
use crate::persist::{InvertedBatch, Store};
use crate::tokenizer::tokenize;
use crate::vocabulary::Vocabulary;
use crate::{InvertedIndexEntry, Posting, SparseVectorRecord, TermIndex};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndexStats {
    pub term_count: usize,
    pub total_postings: usize,
    pub document_count: usize,
    pub avg_postings_per_term: f64,
    pub max_posting_length: usize,
}

fn touch<'a>(touched: &'a mut HashMap<String, InvertedIndexEntry>, store: &Store, workspace_id: &str, term: &str) -> Result<&'a mut InvertedIndexEntry> {
    match touched.entry(term.to_string()) {
        Entry::Occupied(o) => Ok(o.into_mut()),
        Entry::Vacant(v) => {
            let entry = store.load_term(workspace_id, term)?.unwrap_or_else(|| InvertedIndexEntry::new(workspace_id, term));
            Ok(v.insert(entry))
        }
    }
}

fn purge(touched: &mut HashMap<String, InvertedIndexEntry>, store: &Store, workspace_id: &str, vector_store_id: &str) -> Result<usize> {
    let mut removed = 0;
    for term in store.load_doc_terms(workspace_id, vector_store_id)? {
        if touch(touched, store, workspace_id, &term)?.remove_document(vector_store_id) {
            removed += 1;
        }
    }
    Ok(removed)
}

fn append(
    touched: &mut HashMap<String, InvertedIndexEntry>,
    store: &Store,
    reverse: &HashMap<TermIndex, &str>,
    record: &SparseVectorRecord,
) -> Result<Vec<String>> {
    let mut terms = Vec::with_capacity(record.vector.len());
    for e in &record.vector {
        // indices from an older vocabulary generation have no term any more
        let Some(term) = reverse.get(&e.term_index) else { continue };
        touch(touched, store, &record.workspace_id, term)?
            .push(Posting { vector_store_id: record.vector_store_id.clone(), weight: e.weight });
        terms.push(term.to_string());
    }
    Ok(terms)
}

/// Full rebuild of a workspace's inverted index from its sparse vectors.
pub fn build(store: &Store, vocab: &Vocabulary, workspace_id: &str) -> Result<InvertedIndexStats> {
    let reverse = vocab.reverse_index();
    let mut touched: HashMap<String, InvertedIndexEntry> = HashMap::new();
    let mut staged = InvertedBatch::default();
    staged.replace_all();
    let mut docs = 0usize;
    for record in store.iter_sparse(workspace_id) {
        let record = record?;
        let mut terms = Vec::with_capacity(record.vector.len());
        for e in &record.vector {
            let Some(term) = reverse.get(&e.term_index) else { continue };
            touched
                .entry(term.to_string())
                .or_insert_with(|| InvertedIndexEntry::new(workspace_id, term))
                .push(Posting { vector_store_id: record.vector_store_id.clone(), weight: e.weight });
            terms.push(term.to_string());
        }
        staged.put_doc_terms(&record.vector_store_id, terms);
        docs += 1;
    }
    let terms = touched.len();
    for entry in touched.into_values() {
        staged.put_term(entry);
    }
    store.apply_inverted(workspace_id, staged)?;
    tracing::info!(workspace_id, docs, terms, "inverted index built");
    stats(store, workspace_id)
}

pub fn update(store: &Store, vocab: &Vocabulary, record: &SparseVectorRecord) -> Result<()> {
    batch_update(store, vocab, &record.workspace_id, std::slice::from_ref(record))
}

/// Incremental update for a set of (re)indexed documents of one workspace.
pub fn batch_update(store: &Store, vocab: &Vocabulary, workspace_id: &str, records: &[SparseVectorRecord]) -> Result<()> {
    // last write wins for a document listed twice
    let mut latest: HashMap<&str, &SparseVectorRecord> = HashMap::new();
    for r in records {
        latest.insert(r.vector_store_id.as_str(), r);
    }
    let reverse = vocab.reverse_index();
    let mut touched: HashMap<String, InvertedIndexEntry> = HashMap::new();
    let mut staged = InvertedBatch::default();

    let mut purged = 0;
    for id in latest.keys() {
        purged += purge(&mut touched, store, workspace_id, id)?;
    }
    for (id, record) in &latest {
        let terms = append(&mut touched, store, &reverse, record)?;
        staged.put_doc_terms(id, terms);
    }
    let terms = touched.len();
    for entry in touched.into_values() {
        staged.put_term(entry);
    }
    store.apply_inverted(workspace_id, staged)?;
    tracing::debug!(workspace_id, docs = latest.len(), purged, terms, "inverted index updated");
    Ok(())
}

/// Drop every posting of the given documents. Returns the number of postings removed.
pub fn remove(store: &Store, workspace_id: &str, ids: &[String]) -> Result<usize> {
    let mut touched: HashMap<String, InvertedIndexEntry> = HashMap::new();
    let mut staged = InvertedBatch::default();
    let mut removed = 0;
    for id in ids {
        removed += purge(&mut touched, store, workspace_id, id)?;
        staged.put_doc_terms(id, Vec::new());
    }
    for entry in touched.into_values() {
        staged.put_term(entry);
    }
    store.apply_inverted(workspace_id, staged)?;
    Ok(removed)
}

/// Score documents through the postings of the query terms only. Query
/// weights are plain IDF.
pub fn search_optimized(store: &Store, vocab: &Vocabulary, workspace_id: &str, query: &str, limit: usize) -> Result<Vec<(String, f64)>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut scores: HashMap<String, f64> = HashMap::new();
    for term in tokenize(query) {
        if !seen.insert(term.clone()) { continue; }
        let Some(info) = vocab.get(&term) else { continue };
        let Some(entry) = store.load_term(workspace_id, &term)? else { continue };
        for p in entry.postings {
            *scores.entry(p.vector_store_id).or_insert(0.0) += info.idf * p.weight;
        }
    }
    let mut scored: Vec<(String, f64)> = scores.into_iter().collect();
    rank(&mut scored);
    scored.truncate(limit);
    Ok(scored)
}

/// Descending by score; ties by id so results are deterministic.
pub(crate) fn rank(scored: &mut [(String, f64)]) {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

pub fn stats(store: &Store, workspace_id: &str) -> Result<InvertedIndexStats> {
    let entries = store.scan_terms(workspace_id)?;
    let total_postings: usize = entries.iter().map(|e| e.postings.len()).sum();
    let term_count = entries.len();
    Ok(InvertedIndexStats {
        term_count,
        total_postings,
        document_count: store.count_indexed_documents(workspace_id),
        avg_postings_per_term: if term_count == 0 { 0.0 } else { total_postings as f64 / term_count as f64 },
        max_posting_length: entries.iter().map(|e| e.postings.len()).max().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{compute_sparse_vector, Bm25Params};
    use crate::vocabulary::compute_vocabulary;
    use crate::{DocMetadata, DocumentInput};

    fn setup(texts: &[&str]) -> (Store, Vocabulary, Vec<SparseVectorRecord>) {
        let store = Store::temporary().unwrap();
        let docs: Vec<DocumentInput> = texts.iter().enumerate().map(|(i, t)| DocumentInput::new(format!("d{i}"), *t)).collect();
        let (entries, stats) = compute_vocabulary("ws", &docs, None, 800.0).unwrap();
        store.replace_vocabulary("ws", &entries, &stats).unwrap();
        let vocab = Vocabulary::from_entries(entries, Some(stats), 800.0);
        let records: Vec<SparseVectorRecord> = docs
            .iter()
            .map(|d| {
                let (vector, doc_length) = compute_sparse_vector(&vocab, &d.content, Bm25Params::default());
                SparseVectorRecord { workspace_id: "ws".into(), vector_store_id: d.vector_store_id.clone(), vector, doc_length, metadata: DocMetadata::default() }
            })
            .collect();
        store.upsert_sparse_batch(&records).unwrap();
        (store, vocab, records)
    }

    fn assert_df_consistent(store: &Store) {
        for e in store.scan_terms("ws").unwrap() {
            assert_eq!(e.document_frequency as usize, e.postings.len(), "term {}", e.term);
        }
    }

    #[test]
    fn build_indexes_every_term() {
        let (store, _vocab, _) = setup(&["cat dog", "dog bird", "cat cat bird"]);
        let vocab = Vocabulary::from_entries(store.load_vocabulary("ws").unwrap(), store.load_stats("ws").unwrap(), 800.0);
        let s = build(&store, &vocab, "ws").unwrap();
        assert_eq!(s.term_count, 3);
        assert_eq!(s.total_postings, 6);
        assert_eq!(s.document_count, 3);
        assert_eq!(store.load_term("ws", "dog").unwrap().unwrap().document_frequency, 2);
        assert_df_consistent(&store);
    }

    #[test]
    fn reindex_replaces_old_postings() {
        let (store, vocab, mut records) = setup(&["cat dog", "dog bird", "cat cat bird"]);
        batch_update(&store, &vocab, "ws", &records).unwrap();
        batch_update(&store, &vocab, "ws", &records).unwrap();
        assert_eq!(store.load_term("ws", "cat").unwrap().unwrap().postings.len(), 2);

        let (vector, doc_length) = compute_sparse_vector(&vocab, "bird", Bm25Params::default());
        records[0].vector = vector;
        records[0].doc_length = doc_length;
        update(&store, &vocab, &records[0]).unwrap();
        let cat = store.load_term("ws", "cat").unwrap().unwrap();
        assert_eq!(cat.document_frequency, 1);
        assert!(cat.postings.iter().all(|p| p.vector_store_id != "d0"));
        assert_eq!(store.load_term("ws", "bird").unwrap().unwrap().document_frequency, 3);
        assert_df_consistent(&store);
    }

    #[test]
    fn remove_decrements_document_frequency() {
        let (store, vocab, records) = setup(&["cat dog", "dog bird", "cat cat bird"]);
        batch_update(&store, &vocab, "ws", &records).unwrap();
        let before: HashMap<String, u32> = store.scan_terms("ws").unwrap().into_iter().map(|e| (e.term, e.document_frequency)).collect();

        let removed = remove(&store, "ws", &["d2".to_string()]).unwrap();
        assert_eq!(removed, 2);
        let after: HashMap<String, u32> = store.scan_terms("ws").unwrap().into_iter().map(|e| (e.term, e.document_frequency)).collect();
        assert_eq!(after["cat"], before["cat"] - 1);
        assert_eq!(after["bird"], before["bird"] - 1);
        assert_eq!(after["dog"], before["dog"]);
        for e in store.scan_terms("ws").unwrap() {
            assert!(e.postings.iter().all(|p| p.vector_store_id != "d2"));
        }
        assert_eq!(stats(&store, "ws").unwrap().document_count, 2);
    }

    #[test]
    fn removing_last_posting_drops_term() {
        let (store, vocab, records) = setup(&["unique words", "other text"]);
        batch_update(&store, &vocab, "ws", &records).unwrap();
        remove(&store, "ws", &["d0".to_string()]).unwrap();
        assert!(store.load_term("ws", "unique").unwrap().is_none());
        assert_eq!(remove(&store, "ws", &["missing".to_string()]).unwrap(), 0);
    }

    #[test]
    fn optimized_search_ranks_by_idf_dot_weight() {
        let (store, vocab, records) = setup(&["cat dog", "dog bird", "cat cat bird"]);
        batch_update(&store, &vocab, "ws", &records).unwrap();
        let hits = search_optimized(&store, &vocab, "ws", "cat cat", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "d2");
        assert!(search_optimized(&store, &vocab, "ws", "zebra", 10).unwrap().is_empty());
        assert!(search_optimized(&store, &vocab, "ws", "", 10).unwrap().is_empty());
        assert_eq!(search_optimized(&store, &vocab, "ws", "bird dog", 1).unwrap().len(), 1);
    }

    #[test]
    fn build_drops_postings_without_a_stored_vector() {
        let (store, vocab, records) = setup(&["cat dog", "dog bird", "cat cat bird"]);
        batch_update(&store, &vocab, "ws", &records).unwrap();
        let mut ghost = InvertedIndexEntry::new("ws", "ghost");
        ghost.push(Posting { vector_store_id: "gone".into(), weight: 2.0 });
        let mut staged = InvertedBatch::default();
        staged.put_term(ghost);
        staged.put_doc_terms("gone", vec!["ghost".into()]);
        store.apply_inverted("ws", staged).unwrap();
        assert_eq!(stats(&store, "ws").unwrap().document_count, 4);

        let s = build(&store, &vocab, "ws").unwrap();
        assert!(store.load_term("ws", "ghost").unwrap().is_none());
        assert!(store.load_doc_terms("ws", "gone").unwrap().is_empty());
        assert_eq!(s.document_count, 3);
        assert_eq!(s.term_count, 3);
        assert_df_consistent(&store);
    }
}
