//! Retrieval engine executing the selectable strategies

use super::{
    rewrite_query, GraphSearch, RetrievalOrigin, RetrievedChunk, SearchMode, SearchOptions,
};
use crate::embedding::{EmbeddingProvider, VectorIndex};
use crate::error::Result;
use crate::llm::Generator;
use crate::storage::Store;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Executes embedding, fulltext and hybrid retrieval with optional graph
/// augmentation, and merges the results
pub struct RetrievalEngine {
    store: Arc<Store>,
    chunk_index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    graph: GraphSearch,
    limit_multiplier: usize,
    rewrite_temperature: f32,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<Store>,
        chunk_index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        graph: GraphSearch,
        limit_multiplier: usize,
        rewrite_temperature: f32,
    ) -> Self {
        Self {
            store,
            chunk_index,
            embedder,
            generator,
            graph,
            limit_multiplier,
            rewrite_temperature,
        }
    }

    /// Execute a search under the active embedding model
    pub async fn search(
        &self,
        model: &str,
        query: &str,
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedChunk>> {
        let mut results = match options.mode {
            SearchMode::Embedding => self.embedding_search(model, query, k).await?,
            SearchMode::Fulltext => self.fulltext_search(query, k, options).await?,
            SearchMode::Hybrid => self.hybrid_search(model, query, k, options).await,
        };

        if options.use_graph {
            // Graph failures never abort the base strategy
            match self.graph.chunks_for_query(model, query).await {
                Ok(graph_chunks) => merge_graph_results(&mut results, graph_chunks),
                Err(e) => tracing::warn!("Graph augmentation failed: {}", e),
            }
        }

        log_hit_distribution(query, &results);
        Ok(results)
    }

    /// Embedding mode: ANN over chunk vectors, hydrated from the store
    async fn embedding_search(
        &self,
        model: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if self.chunk_index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(model, query).await?;
        let hits = self.chunk_index.search(&query_vector, k)?;

        Ok(self.hydrate(hits, RetrievalOrigin::Embedding))
    }

    /// Fulltext mode: optional conversational rewrite, then keyword search
    async fn fulltext_search(
        &self,
        query: &str,
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedChunk>> {
        let effective_query = match options.chat_model.as_deref() {
            Some(chat_model) => {
                rewrite_query(
                    self.generator.as_ref(),
                    chat_model,
                    &options.chat_history,
                    query,
                    self.rewrite_temperature,
                )
                .await
            }
            None => query.to_string(),
        };

        let hits = self
            .store
            .keyword_search(&effective_query, k, self.limit_multiplier)?;
        let hits: Vec<(i64, f32)> = hits
            .into_iter()
            .map(|h| (h.chunk_id, h.score as f32))
            .collect();

        Ok(self.hydrate(hits, RetrievalOrigin::Fulltext))
    }

    /// Hybrid mode: embedding and fulltext in parallel, interleaved with
    /// embedding hits preferred, deduplicated by chunk id, capped at 2k
    async fn hybrid_search(
        &self,
        model: &str,
        query: &str,
        k: usize,
        options: &SearchOptions,
    ) -> Vec<RetrievedChunk> {
        let (embedding, fulltext) = tokio::join!(
            self.embedding_search(model, query, k),
            self.fulltext_search(query, k, options)
        );

        // One failing leg must not abort the other
        let embedding = embedding.unwrap_or_else(|e| {
            tracing::warn!("Embedding search failed in hybrid mode: {}", e);
            Vec::new()
        });
        let fulltext = fulltext.unwrap_or_else(|e| {
            tracing::warn!("Fulltext search failed in hybrid mode: {}", e);
            Vec::new()
        });

        let mut merged = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut embedding_iter = embedding.into_iter();
        let mut fulltext_iter = fulltext.into_iter();

        loop {
            let mut advanced = false;
            if let Some(chunk) = embedding_iter.next() {
                if seen.insert(chunk.chunk_id) {
                    merged.push(chunk);
                }
                advanced = true;
            }
            if merged.len() >= 2 * k {
                break;
            }
            if let Some(chunk) = fulltext_iter.next() {
                if seen.insert(chunk.chunk_id) {
                    merged.push(chunk);
                }
                advanced = true;
            }
            if !advanced || merged.len() >= 2 * k {
                break;
            }
        }

        merged.truncate(k);
        merged
    }

    /// Fetch chunk rows for scored ids, preserving order.
    /// Ids missing from the store are logged and dropped.
    fn hydrate(&self, hits: Vec<(i64, f32)>, origin: RetrievalOrigin) -> Vec<RetrievedChunk> {
        let mut chunks = Vec::with_capacity(hits.len());

        for (chunk_id, score) in hits {
            match self.store.get_hydrated_chunk(chunk_id) {
                Ok(Some(row)) => chunks.push(RetrievedChunk {
                    chunk_id: row.id,
                    source: row.source,
                    page: row.page,
                    chunk_index: row.chunk_index,
                    content: row.content,
                    score,
                    origin,
                    matched_entities: Vec::new(),
                    from_graph: false,
                }),
                Ok(None) => {
                    tracing::warn!("Chunk {} in index but missing from store; dropped", chunk_id);
                }
                Err(e) => {
                    tracing::warn!("Failed to hydrate chunk {}: {}", chunk_id, e);
                }
            }
        }

        chunks
    }
}

/// Fold graph-recalled chunks into the base results, deduplicating by
/// chunk id and carrying annotations onto already-present chunks
fn merge_graph_results(results: &mut Vec<RetrievedChunk>, graph_chunks: Vec<RetrievedChunk>) {
    for graph_chunk in graph_chunks {
        if let Some(existing) = results
            .iter_mut()
            .find(|r| r.chunk_id == graph_chunk.chunk_id)
        {
            existing.from_graph = true;
            for tag in graph_chunk.matched_entities {
                if !existing.matched_entities.iter().any(|t| t.name == tag.name) {
                    existing.matched_entities.push(tag);
                }
            }
        } else {
            results.push(graph_chunk);
        }
    }
}

/// Per-source hit distribution, for debugging retrieval quality
fn log_hit_distribution(query: &str, results: &[RetrievedChunk]) {
    let mut by_source: HashMap<&str, usize> = HashMap::new();
    for result in results {
        *by_source.entry(result.source.as_str()).or_insert(0) += 1;
    }
    tracing::debug!("Search '{}' hit distribution: {:?}", query, by_source);
}
