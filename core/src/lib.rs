//! Hybrid lexical/semantic retrieval: BM25 sparse vectors, a persisted inverted
//! index, and reciprocal rank fusion with externally supplied dense results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod cancel;
pub mod cache;
pub mod config;
pub mod dense;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod inverted;
pub mod persist;
pub mod rebuild;
pub mod search;
pub mod tokenizer;
pub mod vocabulary;

pub use cancel::CancelToken;
pub use config::{EngineConfig, FallbackPolicy, SearchStrategy};
pub use dense::{DenseDocument, DenseVectorStore, ScrollPage};
pub use engine::HybridIndex;
pub use error::{IndexError, Result};
pub use fusion::{DenseResult, HybridOptions, HybridResultEntry};
pub use inverted::InvertedIndexStats;
pub use rebuild::RebuildReport;
pub use vocabulary::BuildSummary;

pub type TermIndex = u32;

/// One nonzero coordinate of a sparse vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SparseEntry {
    pub term_index: TermIndex,
    pub weight: f64,
}

/// Sorted ascending by `term_index`, no duplicate indices.
pub type SparseVector = Vec<SparseEntry>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    /// Identifier shared with the dense store; the fusion join key when present.
    pub source_id: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DocMetadata {
    pub fn join_key<'a>(&'a self, vector_store_id: &'a str) -> &'a str {
        self.source_id.as_deref().unwrap_or(vector_store_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub workspace_id: String,
    pub term: String,
    pub term_index: TermIndex,
    pub idf: f64,
    pub document_frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceStats {
    pub workspace_id: String,
    pub avg_doc_length: f64,
    pub total_documents: u32,
    pub vocabulary_size: u32,
    /// Incremented on every vocabulary build.
    pub generation: u64,
    /// First term index the next build may assign.
    pub next_term_index: TermIndex,
    pub built_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVectorRecord {
    pub workspace_id: String,
    pub vector_store_id: String,
    pub vector: SparseVector,
    pub doc_length: u32,
    pub metadata: DocMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub vector_store_id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndexEntry {
    pub workspace_id: String,
    pub term: String,
    pub postings: Vec<Posting>,
    /// Always equal to `postings.len()`.
    pub document_frequency: u32,
}

impl InvertedIndexEntry {
    pub fn new(workspace_id: &str, term: &str) -> Self {
        Self { workspace_id: workspace_id.to_string(), term: term.to_string(), postings: Vec::new(), document_frequency: 0 }
    }

    pub fn remove_document(&mut self, vector_store_id: &str) -> bool {
        let before = self.postings.len();
        self.postings.retain(|p| p.vector_store_id != vector_store_id);
        self.document_frequency = self.postings.len() as u32;
        before != self.postings.len()
    }

    pub fn push(&mut self, posting: Posting) {
        self.postings.push(posting);
        self.document_frequency = self.postings.len() as u32;
    }
}

/// A document handed to the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInput {
    pub vector_store_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: DocMetadata,
}

impl DocumentInput {
    pub fn new(vector_store_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { vector_store_id: vector_store_id.into(), content: content.into(), metadata: DocMetadata::default() }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.metadata.source_id = Some(source_id.into());
        self
    }
}

/// A sparse search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseHit {
    pub vector_store_id: String,
    pub score: f64,
    pub metadata: DocMetadata,
}
