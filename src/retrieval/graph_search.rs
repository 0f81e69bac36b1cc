//! Graph augmentation: query -> seed entities -> neighbors -> chunks

use super::{EntityTag, RetrievalOrigin, RetrievedChunk};
use crate::embedding::{EmbeddingProvider, VectorIndex};
use crate::error::Result;
use crate::storage::Store;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Tuning knobs for graph expansion
#[derive(Debug, Clone)]
pub struct GraphSearchParams {
    /// Seed entities kept after merging keyword and vector matches
    pub top_entities: usize,
    /// Neighbor entities added through relationships
    pub max_related: usize,
    /// Chunks recalled through mentions
    pub max_chunks: usize,
}

impl Default for GraphSearchParams {
    fn default() -> Self {
        Self {
            top_entities: 3,
            max_related: 5,
            max_chunks: 5,
        }
    }
}

/// Expands a query into chunks via the entity graph
pub struct GraphSearch {
    store: Arc<Store>,
    entity_index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: GraphSearchParams,
}

impl GraphSearch {
    pub fn new(
        store: Arc<Store>,
        entity_index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: GraphSearchParams,
    ) -> Self {
        Self {
            store,
            entity_index,
            embedder,
            params,
        }
    }

    /// Recall chunks related to the query through the entity graph.
    /// Results carry the names and types of the entities that matched.
    pub async fn chunks_for_query(&self, model: &str, query: &str) -> Result<Vec<RetrievedChunk>> {
        let seed_ids = self.seed_entities(model, query).await?;
        if seed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let neighbors = self
            .store
            .related_entities(&seed_ids, self.params.max_related)?;

        let mut target_ids: Vec<i64> = seed_ids.clone();
        target_ids.extend(neighbors.iter().map(|n| n.entity.id));

        let rows = self
            .store
            .chunks_of_entities(&target_ids, self.params.max_chunks)?;

        let target_set: HashSet<i64> = target_ids.iter().copied().collect();
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let matched_entities: Vec<EntityTag> = self
                .store
                .entities_of_chunk(row.chunk.id)?
                .into_iter()
                .filter(|e| target_set.contains(&e.id))
                .map(|e| EntityTag {
                    name: e.name,
                    kind: e.kind,
                })
                .collect();

            results.push(RetrievedChunk {
                chunk_id: row.chunk.id,
                source: row.source,
                page: row.chunk.page,
                chunk_index: row.chunk.chunk_index,
                content: row.chunk.content,
                score: row.entity_count as f32,
                origin: RetrievalOrigin::Graph,
                matched_entities,
                from_graph: true,
            });
        }

        Ok(results)
    }

    /// Find seed entities by keyword match and vector match in parallel,
    /// merge with an additive score and keep the best few
    async fn seed_entities(&self, model: &str, query: &str) -> Result<Vec<i64>> {
        let candidate_limit = self.params.top_entities.max(1) * 3;

        let keyword_fut = async {
            self.store.keyword_entity_search(query, candidate_limit)
        };
        let vector_fut = async {
            if self.entity_index.is_empty() {
                return Ok(Vec::new());
            }
            let query_vector = self.embedder.embed(model, query).await?;
            self.entity_index.search(&query_vector, candidate_limit)
        };

        let (keyword_hits, vector_hits) = tokio::join!(keyword_fut, vector_fut);

        let mut scores: HashMap<i64, f64> = HashMap::new();
        match keyword_hits {
            Ok(hits) => {
                for hit in hits {
                    *scores.entry(hit.entity.id).or_insert(0.0) += hit.score;
                }
            }
            Err(e) => tracing::warn!("Keyword entity search failed: {}", e),
        }
        match vector_hits {
            Ok(hits) => {
                for (id, score) in hits {
                    *scores.entry(id).or_insert(0.0) += score as f64;
                }
            }
            Err(e) => tracing::warn!("Entity vector search failed: {}", e),
        }

        let mut ranked: Vec<(i64, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(self.params.top_entities);

        Ok(ranked.into_iter().map(|(id, _)| id).collect())
    }
}
