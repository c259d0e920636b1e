//! sled-backed persistence for vocabularies, stats, sparse vectors and the
//! inverted index. Every key starts with `workspace \0`, so a workspace is a
//! prefix range in each tree.

use crate::error::{IndexError, Result};
use crate::{InvertedIndexEntry, SparseVectorRecord, VocabularyEntry, WorkspaceStats};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::collections::HashMap;
use std::path::Path;

const SEP: u8 = 0;
const TERM_NS: &[u8] = b"t\0";
const DOC_NS: &[u8] = b"d\0";

pub struct Store {
    db: sled::Db,
    vocabulary: sled::Tree,
    stats: sled::Tree,
    sparse: sled::Tree,
    inverted: sled::Tree,
}

fn prefix(workspace_id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(workspace_id.len() + 1);
    k.extend_from_slice(workspace_id.as_bytes());
    k.push(SEP);
    k
}

fn key(workspace_id: &str, parts: &[&[u8]]) -> Vec<u8> {
    let mut k = prefix(workspace_id);
    for p in parts { k.extend_from_slice(p); }
    k
}

fn term_key(workspace_id: &str, term: &str) -> Vec<u8> { key(workspace_id, &[TERM_NS, term.as_bytes()]) }
fn doc_key(workspace_id: &str, vector_store_id: &str) -> Vec<u8> { key(workspace_id, &[DOC_NS, vector_store_id.as_bytes()]) }

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> { Ok(bincode::serialize(value)?) }
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> { Ok(bincode::deserialize(bytes)?) }

/// Staged inverted-index writes for one update call, applied as a single atomic batch.
#[derive(Default)]
pub struct InvertedBatch {
    terms: HashMap<String, InvertedIndexEntry>,
    doc_terms: HashMap<String, Vec<String>>,
    replace_all: bool,
}

impl InvertedBatch {
    /// An entry whose postings end up empty is deleted on apply.
    pub fn put_term(&mut self, entry: InvertedIndexEntry) { self.terms.insert(entry.term.clone(), entry); }

    /// An empty term list deletes the document's record on apply.
    pub fn put_doc_terms(&mut self, vector_store_id: &str, terms: Vec<String>) {
        self.doc_terms.insert(vector_store_id.to_string(), terms);
    }

    /// Drop every existing term and document record of the workspace in the
    /// same batch, keeping only what is staged.
    pub fn replace_all(&mut self) { self.replace_all = true; }

    pub fn is_empty(&self) -> bool { !self.replace_all && self.terms.is_empty() && self.doc_terms.is_empty() }
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// An isolated in-memory store, removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            vocabulary: db.open_tree("vocabulary")?,
            stats: db.open_tree("stats")?,
            sparse: db.open_tree("sparse_vectors")?,
            inverted: db.open_tree("inverted")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- vocabulary + stats ---

    pub fn load_vocabulary(&self, workspace_id: &str) -> Result<Vec<VocabularyEntry>> {
        scan(&self.vocabulary, &prefix(workspace_id))
    }

    pub fn load_stats(&self, workspace_id: &str) -> Result<Option<WorkspaceStats>> {
        match self.stats.get(workspace_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Replace the workspace vocabulary and stats row, dropping every sparse
    /// vector and posting of the workspace, in one transaction. Stored vectors
    /// carry the old indices and must be re-encoded.
    pub fn replace_vocabulary(&self, workspace_id: &str, entries: &[VocabularyEntry], stats: &WorkspaceStats) -> Result<()> {
        let p = prefix(workspace_id);
        let mut vocabulary = removal_batch(&self.vocabulary, &p)?;
        for e in entries {
            vocabulary.insert(key(workspace_id, &[e.term.as_bytes()]), encode(e)?);
        }
        let sparse = removal_batch(&self.sparse, &p)?;
        let inverted = removal_batch(&self.inverted, &p)?;
        let stats = encode(stats)?;

        (&self.vocabulary, &self.stats, &self.sparse, &self.inverted)
            .transaction(|(tx_vocabulary, tx_stats, tx_sparse, tx_inverted)| {
                tx_vocabulary.apply_batch(&vocabulary)?;
                tx_stats.insert(workspace_id.as_bytes(), stats.as_slice())?;
                tx_sparse.apply_batch(&sparse)?;
                tx_inverted.apply_batch(&inverted)?;
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => IndexError::Storage(e),
                TransactionError::Abort(()) => IndexError::Storage(sled::Error::Unsupported("vocabulary transaction aborted".into())),
            })
    }

    // --- sparse vectors ---

    pub fn upsert_sparse(&self, record: &SparseVectorRecord) -> Result<()> {
        self.sparse.insert(key(&record.workspace_id, &[record.vector_store_id.as_bytes()]), encode(record)?)?;
        Ok(())
    }

    pub fn upsert_sparse_batch(&self, records: &[SparseVectorRecord]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for r in records {
            batch.insert(key(&r.workspace_id, &[r.vector_store_id.as_bytes()]), encode(r)?);
        }
        self.sparse.apply_batch(batch)?;
        Ok(())
    }

    pub fn load_sparse(&self, workspace_id: &str, vector_store_id: &str) -> Result<Option<SparseVectorRecord>> {
        match self.sparse.get(key(workspace_id, &[vector_store_id.as_bytes()]))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Streams every sparse record of a workspace.
    pub fn iter_sparse(&self, workspace_id: &str) -> impl Iterator<Item = Result<SparseVectorRecord>> {
        self.sparse.scan_prefix(prefix(workspace_id)).values().map(|v| decode(&v?))
    }

    pub fn delete_sparse(&self, workspace_id: &str, ids: &[String]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for id in ids {
            batch.remove(key(workspace_id, &[id.as_bytes()]));
        }
        self.sparse.apply_batch(batch)?;
        Ok(())
    }

    pub fn count_sparse(&self, workspace_id: &str) -> usize { self.sparse.scan_prefix(prefix(workspace_id)).count() }

    // --- inverted index ---

    pub fn load_term(&self, workspace_id: &str, term: &str) -> Result<Option<InvertedIndexEntry>> {
        match self.inverted.get(term_key(workspace_id, term))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_doc_terms(&self, workspace_id: &str, vector_store_id: &str) -> Result<Vec<String>> {
        match self.inverted.get(doc_key(workspace_id, vector_store_id))? {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub fn scan_terms(&self, workspace_id: &str) -> Result<Vec<InvertedIndexEntry>> {
        scan(&self.inverted, &key(workspace_id, &[TERM_NS]))
    }

    pub fn count_indexed_documents(&self, workspace_id: &str) -> usize {
        self.inverted.scan_prefix(key(workspace_id, &[DOC_NS])).count()
    }

    /// Removals and appends for the staged terms land together or not at all.
    pub fn apply_inverted(&self, workspace_id: &str, staged: InvertedBatch) -> Result<()> {
        if staged.is_empty() { return Ok(()); }
        let mut batch = if staged.replace_all { removal_batch(&self.inverted, &prefix(workspace_id))? } else { sled::Batch::default() };
        for (term, entry) in staged.terms {
            let k = term_key(workspace_id, &term);
            if entry.postings.is_empty() { batch.remove(k) } else { batch.insert(k, encode(&entry)?) }
        }
        for (id, terms) in staged.doc_terms {
            let k = doc_key(workspace_id, &id);
            if terms.is_empty() { batch.remove(k) } else { batch.insert(k, encode(&terms)?) }
        }
        self.inverted.apply_batch(batch)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn put_raw_term(&self, workspace_id: &str, term: &str, bytes: &[u8]) -> Result<()> {
        self.inverted.insert(term_key(workspace_id, term), bytes)?;
        Ok(())
    }
}

fn scan<T: DeserializeOwned>(tree: &sled::Tree, prefix: &[u8]) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for v in tree.scan_prefix(prefix).values() {
        out.push(decode(&v?)?);
    }
    Ok(out)
}

fn removal_batch(tree: &sled::Tree, prefix: &[u8]) -> Result<sled::Batch> {
    let mut batch = sled::Batch::default();
    for k in tree.scan_prefix(prefix).keys() {
        batch.remove(k?);
    }
    Ok(batch)
}
