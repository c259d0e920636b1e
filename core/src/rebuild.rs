//! Disaster-recovery path: re-derive the vocabulary, sparse vectors and
//! inverted index of a workspace from the documents held by the dense store.
//! This is the only operation that reassigns term indices.

use crate::cancel::CancelToken;
use crate::dense::DenseVectorStore;
use crate::engine::HybridIndex;
use crate::error::{validate_workspace, Result};
use crate::DocumentInput;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub documents_scanned: usize,
    pub documents_indexed: usize,
    pub vocabulary_size: u32,
    pub avg_doc_length: f64,
    pub pages: usize,
    /// False when cancelled part way; re-run to finish.
    pub completed: bool,
}

impl HybridIndex {
    pub async fn rebuild_from_external_store(
        &self,
        workspace_id: &str,
        dense: &dyn DenseVectorStore,
        cancel: &CancelToken,
    ) -> Result<RebuildReport> {
        validate_workspace(workspace_id)?;
        let _guard = self.lock_workspace(workspace_id).await;
        let mut report = RebuildReport::default();

        let mut documents: Vec<DocumentInput> = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                warn!(workspace_id, pages = report.pages, "rebuild cancelled while scrolling");
                return Ok(report);
            }
            let page = dense.scroll(workspace_id, offset.take(), self.config().scroll_page_size).await?;
            report.pages += 1;
            documents.extend(page.documents.into_iter().map(|d| DocumentInput {
                metadata: d.metadata(),
                vector_store_id: d.id,
                content: d.content,
            }));
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        report.documents_scanned = documents.len();

        if documents.is_empty() {
            info!(workspace_id, "rebuild found no documents");
            report.completed = true;
            return Ok(report);
        }

        // drops every sparse vector and posting built on the previous vocabulary
        let summary = self.build_vocabulary_locked(workspace_id, &documents)?;
        report.vocabulary_size = summary.vocabulary_size;
        report.avg_doc_length = summary.avg_doc_length;

        let vocab = self.vocabulary(workspace_id)?;
        for chunk in documents.chunks(self.config().batch_size.max(1)) {
            if cancel.is_cancelled() {
                warn!(workspace_id, indexed = report.documents_indexed, "rebuild cancelled between batches");
                return Ok(report);
            }
            report.documents_indexed += self.index_chunk_locked(workspace_id, &vocab, chunk)?;
            tokio::task::yield_now().await;
        }
        report.completed = true;
        info!(
            workspace_id,
            documents = report.documents_indexed,
            vocabulary_size = report.vocabulary_size,
            pages = report.pages,
            "rebuild complete"
        );
        Ok(report)
    }
}
