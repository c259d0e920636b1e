use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hybrid_core::dense::{DenseDocument, MemoryDenseStore};
use hybrid_core::{CancelToken, DenseResult, DocMetadata, DocumentInput, EngineConfig, HybridIndex, HybridOptions, SearchStrategy};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct InputDoc {
    id: String,
    #[serde(alias = "body")]
    content: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "sourceId")]
    source_id: Option<String>,
}

impl From<InputDoc> for DocumentInput {
    fn from(doc: InputDoc) -> Self {
        DocumentInput {
            vector_store_id: doc.id,
            content: doc.content,
            metadata: DocMetadata { source_id: doc.source_id, title: doc.title, ..Default::default() },
        }
    }
}

/// One line of a dense-store export: `{id, payload: {content, metadata: {sourceId, title}}}`.
#[derive(Debug, Deserialize)]
struct ExportedPoint {
    id: serde_json::Value,
    payload: ExportedPayload,
}

#[derive(Debug, Deserialize)]
struct ExportedPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: ExportedMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ExportedMetadata {
    #[serde(default, alias = "sourceId")]
    source_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, query and maintain a hybrid BM25 sparse index", long_about = None)]
struct Cli {
    /// sled database directory
    #[arg(long, global = true, default_value = "./index")]
    db: PathBuf,
    /// JSON engine config (environment overrides apply on top)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build vocabulary, sparse vectors and inverted index from JSON/JSONL documents
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        workspace: String,
    },
    /// Sparse keyword search
    Search {
        #[arg(long)]
        workspace: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Force a strategy instead of the configured one
        #[arg(long)]
        full_scan: bool,
        /// Abort the search after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Fuse dense results (JSON array file) with sparse results
    Hybrid {
        #[arg(long)]
        workspace: String,
        query: String,
        #[arg(long)]
        dense: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        alpha: Option<f64>,
    },
    /// Remove documents from the index
    Remove {
        #[arg(long)]
        workspace: String,
        #[arg(long = "id", required = true)]
        ids: Vec<String>,
    },
    /// Re-derive the whole workspace index from a dense-store JSONL export
    Rebuild {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        export: PathBuf,
    },
    /// Print workspace and inverted index statistics
    Stats {
        #[arg(long)]
        workspace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("loading config")?;
    let engine = HybridIndex::open(&cli.db, config).with_context(|| format!("opening {}", cli.db.display()))?;

    match cli.command {
        Commands::Build { input, workspace } => {
            let docs = load_documents(&input)?;
            tracing::info!(documents = docs.len(), "loaded documents");
            let summary = engine.build_vocabulary(&workspace, &docs).await?;
            engine.batch_index_documents(&workspace, &docs).await?;
            let stats = engine.inverted_index_stats(&workspace)?;
            print_json(&serde_json::json!({ "vocabulary": summary, "inverted_index": stats }))?;
        }
        Commands::Search { workspace, query, limit, full_scan, timeout_ms } => {
            let strategy = if full_scan { SearchStrategy::FullScan } else { engine.config().strategy };
            let cancel = timeout_ms.map_or_else(CancelToken::new, |ms| CancelToken::with_timeout(Duration::from_millis(ms)));
            let hits = engine.search_sparse_with(&workspace, &query, limit, strategy, &cancel)?;
            print_json(&hits)?;
        }
        Commands::Hybrid { workspace, query, dense, limit, alpha } => {
            let dense = load_dense_results(&dense)?;
            let fused = engine.hybrid_search(&workspace, &query, &dense, HybridOptions { limit, alpha })?;
            print_json(&fused)?;
        }
        Commands::Remove { workspace, ids } => {
            let postings = engine.remove_from_index(&workspace, &ids).await?;
            print_json(&serde_json::json!({ "removed_documents": ids.len(), "removed_postings": postings }))?;
        }
        Commands::Rebuild { workspace, export } => {
            let store = load_export(&workspace, &export)?;
            let report = engine.rebuild_from_external_store(&workspace, &store, &CancelToken::new()).await?;
            print_json(&report)?;
        }
        Commands::Stats { workspace } => {
            let stats = engine.workspace_stats(&workspace)?;
            let inverted = engine.inverted_index_stats(&workspace)?;
            print_json(&serde_json::json!({ "workspace": stats, "inverted_index": inverted }))?;
        }
    }
    engine.store().flush()?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_documents(input: &Path) -> Result<Vec<DocumentInput>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }

    let mut docs = Vec::new();
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            for line in BufReader::new(File::open(&file)?).lines() {
                let line = line?;
                if line.trim().is_empty() { continue; }
                let doc: InputDoc = serde_json::from_str(&line).with_context(|| format!("parsing {}", file.display()))?;
                docs.push(doc.into());
            }
        } else {
            let json: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(&file)?))?;
            match json {
                serde_json::Value::Array(arr) => {
                    for v in arr {
                        docs.push(serde_json::from_value::<InputDoc>(v)?.into());
                    }
                }
                serde_json::Value::Object(_) => docs.push(serde_json::from_value::<InputDoc>(json)?.into()),
                _ => {}
            }
        }
    }
    Ok(docs)
}

fn load_dense_results(path: &Path) -> Result<Vec<DenseResult>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn load_export(workspace: &str, path: &Path) -> Result<MemoryDenseStore> {
    let mut store = MemoryDenseStore::new();
    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let point: ExportedPoint = serde_json::from_str(&line)?;
        let id = match point.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        store.insert(workspace, DenseDocument {
            id,
            content: point.payload.content,
            source_id: point.payload.metadata.source_id,
            title: point.payload.metadata.title,
        });
    }
    Ok(store)
}
