//! The external dense vector store, as seen by the rebuild path.

use crate::error::Result;
use crate::DocMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One stored point: payload content plus the metadata the sparse side keeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl DenseDocument {
    pub fn metadata(&self) -> DocMetadata {
        DocMetadata { source_id: self.source_id.clone(), title: self.title.clone(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub documents: Vec<DenseDocument>,
    /// Cursor for the next page; `None` once the collection is exhausted.
    pub next_offset: Option<String>,
}

#[async_trait]
pub trait DenseVectorStore: Send + Sync {
    /// Page through every point of a workspace.
    async fn scroll(&self, workspace_id: &str, offset: Option<String>, limit: usize) -> Result<ScrollPage>;
}

/// In-memory dense store; serves exported collections and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryDenseStore {
    documents: Vec<(String, DenseDocument)>,
}

impl MemoryDenseStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, workspace_id: &str, doc: DenseDocument) {
        self.documents.push((workspace_id.to_string(), doc));
    }

    pub fn len(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.documents.is_empty() }
}

#[async_trait]
impl DenseVectorStore for MemoryDenseStore {
    async fn scroll(&self, workspace_id: &str, offset: Option<String>, limit: usize) -> Result<ScrollPage> {
        let start = match offset {
            Some(o) => o.parse::<usize>().map_err(|_| crate::IndexError::DenseStore(format!("bad scroll offset {o:?}")))?,
            None => 0,
        };
        let matching: Vec<&DenseDocument> = self.documents.iter().filter(|(ws, _)| ws == workspace_id).map(|(_, d)| d).collect();
        let end = (start + limit.max(1)).min(matching.len());
        let documents = matching.get(start..end).unwrap_or_default().iter().map(|d| (*d).clone()).collect();
        let next_offset = (end < matching.len()).then(|| end.to_string());
        Ok(ScrollPage { documents, next_offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> DenseDocument {
        DenseDocument { id: id.into(), content: format!("content {id}"), source_id: None, title: None }
    }

    #[tokio::test]
    async fn scroll_pages_through_one_workspace() {
        let mut store = MemoryDenseStore::new();
        for i in 0..5 {
            store.insert("ws", doc(&format!("p{i}")));
        }
        store.insert("other", doc("x"));

        let first = store.scroll("ws", None, 2).await.unwrap();
        assert_eq!(first.documents.len(), 2);
        let second = store.scroll("ws", first.next_offset, 2).await.unwrap();
        assert_eq!(second.documents[0].id, "p2");
        let last = store.scroll("ws", second.next_offset, 2).await.unwrap();
        assert_eq!(last.documents.len(), 1);
        assert!(last.next_offset.is_none());
        assert!(store.scroll("nobody", None, 2).await.unwrap().documents.is_empty());
    }
}
