//! Workspace vocabulary: document frequencies, smoothed IDF and stable term indices.

use crate::error::{IndexError, Result};
use crate::tokenizer::tokenize;
use crate::{DocumentInput, TermIndex, VocabularyEntry, WorkspaceStats};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Robertson/Sparck-Jones IDF with +1 smoothing; never negative for df <= n.
pub fn idf(n: u32, df: u32) -> f64 {
    let (n, df) = (n as f64, df as f64);
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermInfo {
    pub index: TermIndex,
    pub idf: f64,
}

/// In-memory view of a workspace vocabulary and its stats.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    terms: HashMap<String, TermInfo>,
    stats: Option<WorkspaceStats>,
    default_avg_doc_length: f64,
}

impl Vocabulary {
    pub fn empty(default_avg_doc_length: f64) -> Self {
        Self { terms: HashMap::new(), stats: None, default_avg_doc_length }
    }

    pub fn from_entries(entries: Vec<VocabularyEntry>, stats: Option<WorkspaceStats>, default_avg_doc_length: f64) -> Self {
        let terms = entries.into_iter().map(|e| (e.term, TermInfo { index: e.term_index, idf: e.idf })).collect();
        Self { terms, stats, default_avg_doc_length }
    }

    pub fn get(&self, term: &str) -> Option<TermInfo> { self.terms.get(term).copied() }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    pub fn avg_doc_length(&self) -> f64 {
        match &self.stats {
            Some(s) if s.avg_doc_length > 0.0 => s.avg_doc_length,
            _ => self.default_avg_doc_length,
        }
    }

    /// termIndex -> term, built once per index maintenance call.
    pub fn reverse_index(&self) -> HashMap<TermIndex, &str> {
        self.terms.iter().map(|(t, info)| (info.index, t.as_str())).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub vocabulary_size: u32,
    pub total_documents: u32,
    pub avg_doc_length: f64,
    pub generation: u64,
}

/// Derive vocabulary rows and stats from a full document set. Indices are
/// assigned in first-seen order, starting after every index `previous` handed out.
pub fn compute_vocabulary(
    workspace_id: &str,
    documents: &[DocumentInput],
    previous: Option<&WorkspaceStats>,
    default_avg_doc_length: f64,
) -> Result<(Vec<VocabularyEntry>, WorkspaceStats)> {
    let mut order: Vec<String> = Vec::new();
    let mut df: HashMap<String, u32> = HashMap::new();
    let mut total_tokens: u64 = 0;

    for doc in documents {
        let mut seen_in_doc: HashSet<String> = HashSet::new();
        for term in tokenize(&doc.content) {
            total_tokens += 1;
            if seen_in_doc.contains(&term) { continue; }
            match df.get_mut(&term) {
                Some(count) => *count += 1,
                None => {
                    df.insert(term.clone(), 1);
                    order.push(term.clone());
                }
            }
            seen_in_doc.insert(term);
        }
    }

    let n = documents.len() as u32;
    let base = previous.map_or(0, |s| s.next_term_index);
    let next_term_index = u32::try_from(order.len())
        .ok()
        .and_then(|len| base.checked_add(len))
        .ok_or_else(|| IndexError::TermIndexExhausted(workspace_id.to_string()))?;

    let entries: Vec<VocabularyEntry> = order
        .into_iter()
        .enumerate()
        .map(|(i, term)| {
            let document_frequency = df[&term];
            VocabularyEntry {
                workspace_id: workspace_id.to_string(),
                idf: idf(n, document_frequency),
                term_index: base + i as u32,
                term,
                document_frequency,
            }
        })
        .collect();

    let avg_doc_length = if n == 0 { default_avg_doc_length } else { total_tokens as f64 / n as f64 };
    let stats = WorkspaceStats {
        workspace_id: workspace_id.to_string(),
        avg_doc_length,
        total_documents: n,
        vocabulary_size: entries.len() as u32,
        generation: previous.map_or(0, |s| s.generation) + 1,
        next_term_index,
        built_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
    };
    Ok((entries, stats))
}
