//! Ingest pipeline
//!
//! Parses a source file, splits it into chunks and coordinates the chunk
//! store and the chunk vector index with all-or-nothing semantics. Graph
//! building is deliberately not part of ingest; it runs later so ingest
//! latency never depends on the extraction model.

mod parser;
mod splitter;

pub use parser::{extract_pages, PageText, SourceFormat};
pub use splitter::ChunkSplitter;

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, VectorIndex};
use crate::error::{QuarryError, Result};
use crate::storage::Store;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of one ingest call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: i64,
    pub source: String,
    pub chunks: usize,
    /// Whether a previous ingest of the same source was replaced
    pub replaced: bool,
}

/// Drives parsing, splitting, storage and chunk embedding
pub struct IngestPipeline {
    store: Arc<Store>,
    chunk_index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    splitter: ChunkSplitter,
    data_dir: PathBuf,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<Store>,
        chunk_index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            chunk_index,
            embedder,
            splitter: ChunkSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap),
            data_dir: config.storage.data_dir.clone(),
        }
    }

    /// Ingest one source file under the active embedding model.
    ///
    /// Store writes are transactional; if embedding fails afterwards the
    /// document row and any new index points are rolled back before the
    /// error surfaces.
    pub async fn ingest(&self, path: &Path, model: &str) -> Result<IngestReport> {
        if path.as_os_str().is_empty() {
            return Err(QuarryError::InvalidPath("empty path".to_string()));
        }

        let format = SourceFormat::from_path(path)?;

        // Sources are identified by canonical absolute path, never basename
        let canonical = std::fs::canonicalize(path)
            .map_err(|e| QuarryError::InvalidPath(format!("{}: {}", path.display(), e)))?;
        let source = canonical.to_string_lossy().to_string();

        let pages = extract_pages(&canonical, format)?;
        let chunks = self.splitter.split_pages(&pages)?;

        tracing::info!(
            "Ingesting {}: {} pages, {} chunks",
            source,
            pages.len(),
            chunks.len()
        );

        // Fail before any write if the model is missing from the backend
        self.embedder.preflight(model).await?;

        let outcome = self.store.replace_document_chunks(&source, model, &chunks)?;
        if outcome.existed && !outcome.old_chunk_ids.is_empty() {
            self.chunk_index.rebuild_excluding(&outcome.old_chunk_ids)?;
        }

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

            let vectors = match self.embedder.embed_batch(model, &texts).await {
                Ok(v) => v,
                Err(e) => {
                    self.compensate(outcome.document_id, &outcome.new_chunk_ids);
                    return Err(e);
                }
            };

            if let Some(first) = vectors.first() {
                if let Err(e) = self.chunk_index.ensure_compatible(first.len(), model) {
                    self.compensate(outcome.document_id, &outcome.new_chunk_ids);
                    return Err(e);
                }
            }

            for (chunk_id, vector) in outcome.new_chunk_ids.iter().zip(vectors) {
                if let Err(e) = self.chunk_index.upsert(*chunk_id, vector) {
                    self.compensate(outcome.document_id, &outcome.new_chunk_ids);
                    return Err(e);
                }
            }
        }

        self.chunk_index.save()?;
        self.record_source(&canonical);

        Ok(IngestReport {
            document_id: outcome.document_id,
            source,
            chunks: outcome.new_chunk_ids.len(),
            replaced: outcome.existed,
        })
    }

    /// Undo the committed document and any index points after a failure
    fn compensate(&self, document_id: i64, new_chunk_ids: &[i64]) {
        tracing::warn!(
            "Embedding failed for document {}; rolling back {} chunks",
            document_id,
            new_chunk_ids.len()
        );

        if let Err(e) = self.store.delete_document_by_id(document_id) {
            tracing::error!("Compensation failed to delete document {}: {}", document_id, e);
        }
        if let Err(e) = self.chunk_index.rebuild_excluding(new_chunk_ids) {
            tracing::error!("Compensation failed to prune index points: {}", e);
        }
        if let Err(e) = self.chunk_index.save() {
            tracing::error!("Compensation failed to save index: {}", e);
        }
    }

    /// Append the source filename to the informational sources.json list
    fn record_source(&self, canonical: &Path) {
        let name = match canonical.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => return,
        };

        let path = self.data_dir.join("sources.json");
        let mut names: Vec<String> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        if !names.contains(&name) {
            names.push(name);
            match serde_json::to_string_pretty(&names) {
                Ok(raw) => {
                    if let Err(e) = std::fs::write(&path, raw) {
                        tracing::warn!("Failed to update sources.json: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Failed to encode sources.json: {}", e),
            }
        }
    }
}
