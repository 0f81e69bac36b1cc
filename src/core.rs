//! Core facade wiring the retrieval components together
//!
//! Owns the store, both vector indices and the governor, and exposes the
//! operation surface the UI layer consumes. A process-wide reader/writer
//! gate serializes model switches against every other operation.

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, OllamaEmbedder, VectorIndex};
use crate::error::{QuarryError, Result};
use crate::extraction::Extractor;
use crate::governor::{ModelGovernor, SetResult};
use crate::graph::{GraphBuildStatus, GraphBuilder, GraphProgress, GraphReport};
use crate::ingest::{IngestPipeline, IngestReport};
use crate::llm::{Generator, OllamaGenerator};
use crate::retrieval::{
    GraphSearch, GraphSearchParams, RetrievalEngine, RetrievedChunk, SearchOptions,
};
use crate::storage::{SourceEntry, Store};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Aggregate statistics over the store and indices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreStats {
    pub active_model: String,
    pub documents: usize,
    pub chunks: usize,
    pub chunk_vectors: usize,
    pub entities: usize,
    pub relationships: usize,
    pub entity_vectors: usize,
}

/// The retrieval core
pub struct RetrievalCore {
    store: Arc<Store>,
    chunk_index: Arc<VectorIndex>,
    entity_index: Arc<VectorIndex>,
    governor: ModelGovernor,
    pipeline: IngestPipeline,
    builder: GraphBuilder,
    engine: RetrievalEngine,
    /// Read side for ingest/search/build, write side for model switches
    model_gate: RwLock<()>,
}

impl RetrievalCore {
    /// Open the core with the Ollama-backed services from configuration
    pub fn open(config: Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.ollama.request_timeout_secs);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbedder::new(
            &config.ollama.base_url,
            timeout,
            config.embedding.batch_size,
        )?);
        let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(
            &config.ollama.base_url,
            Duration::from_secs(config.extraction.timeout_secs),
        )?);

        Self::open_with_services(config, embedder, generator)
    }

    /// Open the core with injected service implementations
    pub fn open_with_services(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let data_dir = &config.storage.data_dir;
        std::fs::create_dir_all(data_dir).map_err(|e| {
            QuarryError::io(e, format!("Failed to create data dir: {}", data_dir.display()))
        })?;

        let store = Arc::new(Store::open(&data_dir.join("store.db"))?);
        let chunk_index_dir = data_dir.join("chunk_index");
        let entity_index_dir = data_dir.join("entity_index");

        // An index whose points disagree with its recorded dimension cannot
        // be loaded; it gets cleared the way a forced model switch clears
        // vector state, then the open is retried against empty directories.
        let open_indices = || -> Result<(Arc<VectorIndex>, Arc<VectorIndex>)> {
            let chunk = Arc::new(VectorIndex::open(
                &chunk_index_dir,
                config.index.hnsw_m,
                config.index.hnsw_ef_construction,
                config.index.ef_search,
            )?);
            let entity = Arc::new(VectorIndex::open(
                &entity_index_dir,
                config.index.hnsw_m,
                config.index.hnsw_ef_construction,
                config.index.ef_search,
            )?);
            Ok((chunk, entity))
        };

        let (chunk_index, entity_index) = match open_indices() {
            Ok(indices) => indices,
            Err(QuarryError::DimensionMismatch { expected, actual }) => {
                tracing::warn!(
                    "Vector index dimension mismatch on load (expected {}, got {}); \
                     clearing vector state",
                    expected,
                    actual
                );
                VectorIndex::destroy(&chunk_index_dir)?;
                VectorIndex::destroy(&entity_index_dir)?;
                store.clear_documents()?;
                store.cleanup_orphans()?;
                open_indices()?
            }
            Err(e) => return Err(e),
        };

        let governor = ModelGovernor::open(
            store.clone(),
            chunk_index_dir.clone(),
            entity_index_dir.clone(),
            &config.embedding.model,
        )?;

        reconcile_stale_indices(
            &governor,
            &store,
            &chunk_index,
            &entity_index,
            &chunk_index_dir,
            &entity_index_dir,
        )?;

        let pipeline = IngestPipeline::new(
            store.clone(),
            chunk_index.clone(),
            embedder.clone(),
            &config,
        );

        let extractor = Arc::new(Extractor::new(
            generator.clone(),
            config.extraction.temperature,
        ));
        let builder = GraphBuilder::new(
            store.clone(),
            entity_index.clone(),
            embedder.clone(),
            extractor,
            config.extraction.batch_size,
        );

        let graph_search = GraphSearch::new(
            store.clone(),
            entity_index.clone(),
            embedder.clone(),
            GraphSearchParams {
                top_entities: config.retrieval.top_entities,
                max_related: config.retrieval.max_related,
                max_chunks: config.retrieval.max_graph_chunks,
            },
        );
        let engine = RetrievalEngine::new(
            store.clone(),
            chunk_index.clone(),
            embedder,
            generator,
            graph_search,
            config.retrieval.limit_multiplier,
            config.retrieval.rewrite_temperature,
        );

        Ok(Self {
            store,
            chunk_index,
            entity_index,
            governor,
            pipeline,
            builder,
            engine,
            model_gate: RwLock::new(()),
        })
    }

    /// Ingest a source file under the active embedding model
    pub async fn ingest(&self, path: &Path) -> Result<IngestReport> {
        let _gate = self.model_gate.read().await;
        let model = self.governor.current();
        self.pipeline.ingest(path, &model).await
    }

    /// Delete a source and every piece of state derived from it.
    /// Returns whether anything was deleted.
    pub async fn delete(&self, source: &str) -> Result<bool> {
        let _gate = self.model_gate.read().await;
        let source = canonical_source(source);

        let Some(chunk_ids) = self.store.delete_document(&source)? else {
            return Ok(false);
        };

        self.chunk_index.rebuild_excluding(&chunk_ids)?;
        self.chunk_index.save()?;

        // Entities are shared; pruning mentions may orphan some of them
        let cleanup = self.store.cleanup_orphans()?;
        if !cleanup.entity_ids.is_empty() {
            self.entity_index.rebuild_excluding(&cleanup.entity_ids)?;
            self.entity_index.save()?;
        }

        tracing::info!(
            "Deleted {}: {} chunks, {} orphaned entities",
            source,
            chunk_ids.len(),
            cleanup.entity_ids.len()
        );
        Ok(true)
    }

    /// Every ingested source with its embedding models
    pub async fn list_sources(&self) -> Result<Vec<SourceEntry>> {
        let _gate = self.model_gate.read().await;
        self.store.list_sources()
    }

    /// Execute a retrieval query
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedChunk>> {
        let _gate = self.model_gate.read().await;
        let model = self.governor.current();
        self.engine.search(&model, query, k, options).await
    }

    /// The active embedding model
    pub async fn active_model(&self) -> String {
        let _gate = self.model_gate.read().await;
        self.governor.current()
    }

    /// Switch the active embedding model (see the governor for protocol)
    pub async fn set_embedding_model(&self, name: &str, force: bool) -> Result<SetResult> {
        let _gate = self.model_gate.write().await;
        let result = self.governor.set(name, force)?;

        if result == SetResult::Switched {
            self.chunk_index.reset();
            self.entity_index.reset();
        }
        Ok(result)
    }

    /// Build the knowledge graph for an ingested source
    pub async fn build_graph(
        &self,
        source: &str,
        extraction_model: &str,
        cancel: Arc<AtomicBool>,
        on_progress: impl Fn(GraphProgress),
    ) -> Result<GraphReport> {
        let _gate = self.model_gate.read().await;
        let source = canonical_source(source);
        let model = self.governor.current();
        self.builder
            .build_graph(&source, extraction_model, &model, cancel, on_progress)
            .await
    }

    /// How much of a source's graph has been built
    pub async fn graph_progress(&self, source: &str) -> Result<GraphBuildStatus> {
        let _gate = self.model_gate.read().await;
        let source = canonical_source(source);

        let document_id = self
            .store
            .document_id_for_source(&source)?
            .ok_or_else(|| QuarryError::NotFound {
                source_path: source.clone(),
            })?;

        let total_chunks = self.store.chunk_ids_of_document(document_id)?.len();
        let processed_chunks = self.store.count_chunks_with_mentions(document_id)? as usize;
        let percentage = if total_chunks == 0 {
            0.0
        } else {
            processed_chunks as f32 / total_chunks as f32 * 100.0
        };

        Ok(GraphBuildStatus {
            total_chunks,
            processed_chunks,
            percentage,
        })
    }

    /// Aggregate statistics
    pub async fn stats(&self) -> Result<CoreStats> {
        let _gate = self.model_gate.read().await;
        let store_stats = self.store.stats()?;
        Ok(CoreStats {
            active_model: self.governor.current(),
            documents: store_stats.document_count,
            chunks: store_stats.chunk_count,
            chunk_vectors: self.chunk_index.len(),
            entities: store_stats.entity_count,
            relationships: store_stats.relationship_count,
            entity_vectors: self.entity_index.len(),
        })
    }
}

/// Indices whose recorded model disagrees with the active model are stale
/// (a switch that crashed mid-cascade, or state copied between machines).
/// They get cleared exactly the way a forced switch clears them.
fn reconcile_stale_indices(
    governor: &ModelGovernor,
    store: &Store,
    chunk_index: &VectorIndex,
    entity_index: &VectorIndex,
    chunk_index_dir: &PathBuf,
    entity_index_dir: &PathBuf,
) -> Result<()> {
    let active = governor.current();
    let active = active.trim_end_matches(":latest");

    let stale = [chunk_index.model(), entity_index.model()]
        .into_iter()
        .flatten()
        .any(|m| m.trim_end_matches(":latest") != active);

    if stale {
        tracing::warn!(
            "Vector index model disagrees with active model {}; clearing vector state",
            active
        );
        VectorIndex::destroy(chunk_index_dir)?;
        VectorIndex::destroy(entity_index_dir)?;
        chunk_index.reset();
        entity_index.reset();
        store.clear_documents()?;
        store.cleanup_orphans()?;
    }

    Ok(())
}

/// Sources are identified by canonical absolute path; a source that no
/// longer exists on disk is looked up by the string it was stored under
fn canonical_source(source: &str) -> String {
    std::fs::canonicalize(Path::new(source))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| source.to_string())
}
