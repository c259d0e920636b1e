use hybrid_core::dense::{DenseDocument, MemoryDenseStore};
use hybrid_core::{CancelToken, DenseResult, DocumentInput, EngineConfig, HybridIndex, HybridOptions, SearchStrategy};
use std::sync::Arc;

fn corpus() -> Vec<DocumentInput> {
    let texts = [
        "Rust guarantees memory safety through ownership and borrowing",
        "The tokio runtime drives async tasks on a thread pool",
        "Inverted indexes map each term to a postings list",
        "BM25 weighs term frequency against document length",
        "Reciprocal rank fusion merges ranked lists from several retrievers",
        "Garbage collected languages trade latency for convenience",
        "A postings list stores document ids with term weights",
        "Semantic search embeds queries and documents as dense vectors",
    ];
    texts.iter().enumerate().map(|(i, t)| DocumentInput::new(format!("vs-{i}"), *t).with_source_id(format!("doc-{i}"))).collect()
}

async fn indexed_engine(config: EngineConfig) -> HybridIndex {
    let engine = HybridIndex::temporary(config).unwrap();
    let docs = corpus();
    engine.build_vocabulary("ws", &docs).await.unwrap();
    engine.batch_index_documents("ws", &docs).await.unwrap();
    engine
}

#[tokio::test]
async fn self_retrieval_round_trip() {
    let engine = indexed_engine(EngineConfig::default()).await;
    for doc in corpus() {
        let query: String = doc.content.split_whitespace().take(4).collect::<Vec<_>>().join(" ");
        let hits = engine.search_sparse("ws", &query, 3).unwrap();
        let hit = hits.iter().find(|h| h.vector_store_id == doc.vector_store_id);
        assert!(hit.is_some_and(|h| h.score > 0.0), "query {query:?} missed {}", doc.vector_store_id);
    }
}

#[tokio::test]
async fn strategies_agree_on_top_result() {
    let engine = indexed_engine(EngineConfig::default()).await;
    let cancel = CancelToken::new();
    for query in ["postings list", "term weights", "tokio async", "dense vectors semantic", "memory ownership"] {
        let scan = engine.search_sparse_with("ws", query, 5, SearchStrategy::FullScan, &cancel).unwrap();
        let inv = engine.search_sparse_with("ws", query, 5, SearchStrategy::InvertedIndex, &cancel).unwrap();
        assert!(!scan.is_empty() && !inv.is_empty(), "{query}");
        let top_scan = scan[0].score;
        let tied: Vec<&str> = scan.iter().filter(|h| (h.score - top_scan).abs() < 1e-9).map(|h| h.vector_store_id.as_str()).collect();
        assert!(tied.contains(&inv[0].vector_store_id.as_str()), "{query}: {tied:?} vs {}", inv[0].vector_store_id);
    }
}

#[tokio::test]
async fn hybrid_joins_dense_and_sparse_on_source_id() {
    let engine = indexed_engine(EngineConfig::default()).await;
    // dense ids differ from the sparse side's vector store ids
    let dense = vec![
        DenseResult::new("point-6", 0.91).with_source_id("doc-6"),
        DenseResult::new("point-7", 0.88).with_source_id("doc-7"),
    ];
    let fused = engine.hybrid_search("ws", "postings list", &dense, HybridOptions { limit: 5, alpha: None }).unwrap();
    assert!(fused.len() <= 5);
    let doc6 = fused.iter().find(|e| e.id == "doc-6").unwrap();
    assert!(doc6.dense_rank.is_some() && doc6.sparse_rank.is_some());
    assert_eq!(fused.iter().filter(|e| e.id == "doc-6").count(), 1);
    // the strongest keyword-only hit is boosted past the item found by both
    let doc2 = fused.iter().find(|e| e.id == "doc-2").unwrap();
    assert!(doc2.dense_rank.is_none());
    assert_eq!(doc2.normalized_sparse_score, Some(1.0));
    assert_eq!(doc2.boost, 2.0);
    assert_eq!(fused[0].id, "doc-2");
    assert_eq!(fused[1].id, "doc-6");
    assert_eq!(fused[2].id, "doc-7");
}

#[tokio::test]
async fn removal_and_reindex_keep_postings_exact() {
    let engine = indexed_engine(EngineConfig::default()).await;
    let before = engine.inverted_index_stats("ws").unwrap();
    engine.batch_index_documents("ws", &corpus()).await.unwrap();
    assert_eq!(engine.inverted_index_stats("ws").unwrap(), before);

    engine.remove_from_index("ws", &["vs-6".to_string()]).await.unwrap();
    let hits = engine.search_sparse("ws", "postings list", 10).unwrap();
    assert!(hits.iter().all(|h| h.vector_store_id != "vs-6"));
    assert_eq!(engine.inverted_index_stats("ws").unwrap().document_count, before.document_count - 1);
    assert!(engine.store().load_sparse("ws", "vs-6").unwrap().is_none());
}

#[tokio::test]
async fn build_inverted_index_matches_incremental() {
    let engine = indexed_engine(EngineConfig::default()).await;
    let incremental = engine.inverted_index_stats("ws").unwrap();
    let rebuilt = engine.build_inverted_index("ws").await.unwrap();
    assert_eq!(incremental, rebuilt);
}

#[tokio::test]
async fn concurrent_writers_are_serialized() {
    let engine = Arc::new(indexed_engine(EngineConfig::default()).await);
    let mut tasks = Vec::new();
    for round in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let doc = DocumentInput::new("vs-2", if round % 2 == 0 { "postings term" } else { "inverted indexes" });
            engine.index_document("ws", &doc).await.unwrap();
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    for entry in engine.store().scan_terms("ws").unwrap() {
        let count = entry.postings.iter().filter(|p| p.vector_store_id == "vs-2").count();
        assert!(count <= 1, "duplicate postings for {}", entry.term);
        assert_eq!(entry.document_frequency as usize, entry.postings.len());
    }
}

#[tokio::test]
async fn rebuild_replaces_term_indices() {
    let engine = indexed_engine(EngineConfig::default()).await;
    let old = engine.workspace_stats("ws").unwrap().unwrap();

    let mut dense = MemoryDenseStore::new();
    for doc in corpus().into_iter().take(3) {
        dense.insert("ws", DenseDocument { id: doc.vector_store_id, content: doc.content, source_id: doc.metadata.source_id, title: None });
    }
    let report = engine.rebuild_from_external_store("ws", &dense, &CancelToken::new()).await.unwrap();
    assert!(report.completed);
    assert_eq!(report.documents_indexed, 3);

    let new = engine.workspace_stats("ws").unwrap().unwrap();
    assert_eq!(new.generation, old.generation + 1);
    assert_eq!(new.total_documents, 3);
    assert!(engine.store().load_sparse("ws", "vs-7").unwrap().is_none());
    for entry in engine.store().load_vocabulary("ws").unwrap() {
        assert!(entry.term_index >= old.next_term_index);
    }
    assert_eq!(engine.search_sparse("ws", "tokio runtime", 3).unwrap()[0].vector_store_id, "vs-1");
}

#[tokio::test]
async fn index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = HybridIndex::open(dir.path(), EngineConfig::default()).unwrap();
        let docs = corpus();
        engine.build_vocabulary("ws", &docs).await.unwrap();
        engine.batch_index_documents("ws", &docs).await.unwrap();
        engine.store().flush().unwrap();
    }
    let engine = HybridIndex::open(dir.path(), EngineConfig::default()).unwrap();
    let hits = engine.search_sparse("ws", "reciprocal rank fusion", 1).unwrap();
    assert_eq!(hits[0].vector_store_id, "vs-4");
}
