//! Graph builder
//!
//! Walks a document's chunks through the extractor in batches and populates
//! the graph store and the entity vector index. Extraction is the expensive
//! step, so it is decoupled from ingest and driven here with bounded
//! concurrency, per-chunk failure absorption and a cancel signal checked
//! between batches and between chunks.

use crate::embedding::{EmbeddingProvider, VectorIndex};
use crate::error::{QuarryError, Result};
use crate::extraction::{Extraction, Extractor};
use crate::storage::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress event emitted after each batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphProgress {
    pub processed: usize,
    pub total: usize,
    pub successful: usize,
    pub skipped: usize,
    pub batch_index: usize,
    pub total_batches: usize,
}

/// Final report of one build run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphReport {
    pub total_chunks: usize,
    pub processed: usize,
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Build status for a source (chunks with at least one entity mention)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphBuildStatus {
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub percentage: f32,
}

/// Batched driver from chunks to graph rows and entity vectors
pub struct GraphBuilder {
    store: Arc<Store>,
    entity_index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Arc<Extractor>,
    batch_size: usize,
}

impl GraphBuilder {
    pub fn new(
        store: Arc<Store>,
        entity_index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<Extractor>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            entity_index,
            embedder,
            extractor,
            batch_size: batch_size.max(1),
        }
    }

    /// Build the knowledge graph for one previously ingested source.
    ///
    /// Chunks that already carry an entity mention are skipped, which makes
    /// repeated runs idempotent. Per-chunk extraction failures are logged
    /// and absorbed. A raised cancel flag ends the run between batches or
    /// chunks; extractions persisted so far are retained.
    pub async fn build_graph(
        &self,
        source: &str,
        extraction_model: &str,
        embedding_model: &str,
        cancel: Arc<AtomicBool>,
        on_progress: impl Fn(GraphProgress),
    ) -> Result<GraphReport> {
        let document_id = self
            .store
            .document_id_for_source(source)?
            .ok_or_else(|| QuarryError::NotFound {
                source_path: source.to_string(),
            })?;

        let chunks = self.store.get_chunks(document_id)?;
        let total = chunks.len();
        let total_batches = total.div_ceil(self.batch_size);

        tracing::info!(
            "Building graph for {}: {} chunks in {} batches",
            source,
            total,
            total_batches
        );

        let mut processed = 0;
        let mut successful = 0;
        let mut skipped = 0;
        let mut failed = 0;
        let mut cancelled = false;

        'batches: for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }

            // Extraction runs concurrently within the batch; batch N
            // finishes persisting before batch N+1 starts.
            let mut handles = Vec::with_capacity(batch.len());
            for chunk in batch {
                if cancel.load(Ordering::SeqCst) {
                    cancelled = true;
                    break 'batches;
                }

                if self.store.chunk_has_entity_mentions(chunk.id)? {
                    processed += 1;
                    skipped += 1;
                    continue;
                }

                let extractor = self.extractor.clone();
                let model = extraction_model.to_string();
                let text = chunk.content.clone();
                let chunk_id = chunk.id;
                handles.push(tokio::spawn(async move {
                    (chunk_id, extractor.extract(&model, &text).await)
                }));
            }

            for handle in handles {
                let (chunk_id, result) = handle
                    .await
                    .map_err(|e| QuarryError::Other(anyhow::anyhow!("extraction task: {}", e)))?;
                processed += 1;

                match result {
                    Ok(extraction) => {
                        self.persist_extraction(chunk_id, &extraction)?;
                        successful += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Extraction failed for chunk {}: {}", chunk_id, e);
                        failed += 1;
                    }
                }
            }

            on_progress(GraphProgress {
                processed,
                total,
                successful,
                skipped,
                batch_index,
                total_batches,
            });
        }

        if !cancelled {
            self.embed_new_entities(embedding_model).await?;
        }

        tracing::info!(
            "Graph build for {} done: {} successful, {} skipped, {} failed{}",
            source,
            successful,
            skipped,
            failed,
            if cancelled { " (cancelled)" } else { "" }
        );

        Ok(GraphReport {
            total_chunks: total,
            processed,
            successful,
            skipped,
            failed,
            cancelled,
        })
    }

    /// Store one chunk's validated extraction with upsert semantics so
    /// shared entities deduplicate across chunks
    fn persist_extraction(&self, chunk_id: i64, extraction: &Extraction) -> Result<()> {
        let mut ids: HashMap<String, i64> = HashMap::new();

        for entity in &extraction.entities {
            let entity_id = self.store.upsert_entity(
                &entity.name,
                entity.kind.as_str(),
                entity.description.as_deref(),
            )?;
            self.store.insert_entity_mention(
                entity_id,
                chunk_id,
                Some(&entity.name),
                entity.confidence,
            )?;
            ids.insert(entity.name.to_lowercase(), entity_id);
        }

        for rel in &extraction.relationships {
            let (Some(&source_id), Some(&target_id)) = (
                ids.get(&rel.source.to_lowercase()),
                ids.get(&rel.target.to_lowercase()),
            ) else {
                continue;
            };

            let rel_id = self.store.upsert_relationship(
                source_id,
                target_id,
                rel.kind.as_str(),
                rel.description.as_deref(),
                Some(rel.weight),
            )?;

            let context = rel.description.clone().unwrap_or_else(|| {
                format!("{} {} {}", rel.source, rel.kind.as_str(), rel.target)
            });
            self.store
                .insert_relationship_mention(rel_id, chunk_id, Some(&context), rel.confidence)?;
        }

        Ok(())
    }

    /// Embed entities that have no vector for the active model yet.
    /// Runs once per build so index construction amortizes across chunks.
    async fn embed_new_entities(&self, model: &str) -> Result<()> {
        let missing = self.store.entities_missing_vectors(model)?;
        if missing.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = missing
            .iter()
            .map(|e| match e.description.as_deref() {
                Some(desc) => format!("{}: {}", e.name, desc),
                None => e.name.clone(),
            })
            .collect();

        let vectors = self.embedder.embed_batch(model, &texts).await?;
        if let Some(first) = vectors.first() {
            self.entity_index.ensure_compatible(first.len(), model)?;
        }

        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        for (entity, vector) in missing.iter().zip(vectors) {
            self.entity_index.upsert(entity.id, vector)?;
            self.store
                .record_entity_embedding(entity.id, model, dimension)?;
        }
        self.entity_index.save()?;

        tracing::debug!("Embedded {} new entities for model {}", missing.len(), model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerateOptions, Generation, Generator};
    use crate::storage::NewChunk;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Generator that "extracts" the first word of the chunk as a PERSON
    struct FirstWordGenerator;

    #[async_trait]
    impl Generator for FirstWordGenerator {
        async fn generate(
            &self,
            _model: &str,
            prompt: &str,
            _options: GenerateOptions,
        ) -> Result<Generation> {
            let text = prompt.rsplit("Text:\n").next().unwrap_or("");
            let name = text.split_whitespace().next().unwrap_or("Unknown");
            Ok(Generation {
                response: Some(format!(
                    r#"{{"entities": [{{"name": "{}", "type": "PERSON"}}], "relationships": []}}"#,
                    name
                )),
                reasoning: None,
            })
        }
    }

    struct StaticEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StaticEmbedder {
        async fn embed_batch(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        async fn preflight(&self, _model: &str) -> Result<()> {
            Ok(())
        }
    }

    fn builder(temp: &TempDir) -> (GraphBuilder, Arc<Store>, Arc<VectorIndex>) {
        let store = Arc::new(Store::open(&temp.path().join("store.db")).unwrap());
        let entity_index =
            Arc::new(VectorIndex::open(&temp.path().join("entity_index"), 16, 200, 50).unwrap());
        let extractor = Arc::new(Extractor::new(Arc::new(FirstWordGenerator), 0.1));

        let builder = GraphBuilder::new(
            store.clone(),
            entity_index.clone(),
            Arc::new(StaticEmbedder),
            extractor,
            2,
        );
        (builder, store, entity_index)
    }

    fn seed_document(store: &Store, contents: &[&str]) {
        let chunks: Vec<NewChunk> = contents
            .iter()
            .enumerate()
            .map(|(i, text)| NewChunk {
                chunk_index: i as i64,
                page: None,
                content: text.to_string(),
            })
            .collect();
        store
            .replace_document_chunks("/doc.txt", "embed-model", &chunks)
            .unwrap();
    }

    #[tokio::test]
    async fn test_build_graph_populates_store_and_index() {
        let temp = TempDir::new().unwrap();
        let (builder, store, entity_index) = builder(&temp);
        seed_document(&store, &["Kant wrote", "Hume replied", "Kant again"]);

        let report = builder
            .build_graph(
                "/doc.txt",
                "extract-model",
                "embed-model",
                Arc::new(AtomicBool::new(false)),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.successful, 3);
        assert_eq!(report.failed, 0);
        assert!(!report.cancelled);

        // "Kant" deduplicates across chunks
        let stats = store.graph_stats().unwrap();
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.entity_mentions, 3);
        assert_eq!(entity_index.len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let temp = TempDir::new().unwrap();
        let (builder, store, _) = builder(&temp);
        seed_document(&store, &["Kant wrote", "Hume replied"]);

        let cancel = Arc::new(AtomicBool::new(false));
        builder
            .build_graph("/doc.txt", "m", "embed-model", cancel.clone(), |_| {})
            .await
            .unwrap();
        let entities_before = store.graph_stats().unwrap().entities;

        let report = builder
            .build_graph("/doc.txt", "m", "embed-model", cancel, |_| {})
            .await
            .unwrap();

        assert_eq!(report.skipped, report.total_chunks);
        assert_eq!(report.successful, 0);
        assert_eq!(store.graph_stats().unwrap().entities, entities_before);
    }

    #[tokio::test]
    async fn test_unknown_source_fails() {
        let temp = TempDir::new().unwrap();
        let (builder, _, _) = builder(&temp);

        let err = builder
            .build_graph(
                "/missing.txt",
                "m",
                "embed-model",
                Arc::new(AtomicBool::new(false)),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_progress_events_per_batch() {
        let temp = TempDir::new().unwrap();
        let (builder, store, _) = builder(&temp);
        seed_document(&store, &["One chunk", "Two chunk", "Three chunk", "Four chunk", "Five chunk"]);

        let events: Mutex<Vec<GraphProgress>> = Mutex::new(Vec::new());
        builder
            .build_graph(
                "/doc.txt",
                "m",
                "embed-model",
                Arc::new(AtomicBool::new(false)),
                |p| events.lock().unwrap().push(p),
            )
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        // 5 chunks in batches of 2 -> 3 batches
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].total_batches, 3);
        assert_eq!(events.last().unwrap().processed, 5);
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_report() {
        let temp = TempDir::new().unwrap();
        let (builder, store, _) = builder(&temp);
        seed_document(&store, &["One chunk", "Two chunk", "Three chunk", "Four chunk"]);

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_in_callback = cancel.clone();

        let report = builder
            .build_graph("/doc.txt", "m", "embed-model", cancel, move |_| {
                // Raise the flag after the first batch completes
                cancel_in_callback.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.processed < report.total_chunks);
        // The first batch's extractions were persisted and survive
        assert!(store.graph_stats().unwrap().entity_mentions > 0);
    }

    #[tokio::test]
    async fn test_entity_embedding_input_uses_description() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&temp.path().join("store.db")).unwrap());
        let entity_index =
            Arc::new(VectorIndex::open(&temp.path().join("entity_index"), 16, 200, 50).unwrap());

        struct Recorder(Mutex<Vec<String>>);

        #[async_trait]
        impl EmbeddingProvider for Recorder {
            async fn embed_batch(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                self.0.lock().unwrap().extend(texts.iter().cloned());
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
            async fn preflight(&self, _model: &str) -> Result<()> {
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let builder = GraphBuilder::new(
            store.clone(),
            entity_index,
            recorder.clone(),
            Arc::new(Extractor::new(Arc::new(FirstWordGenerator), 0.1)),
            2,
        );

        store.upsert_entity("Kant", "PERSON", Some("German philosopher")).unwrap();
        store.upsert_entity("Hume", "PERSON", None).unwrap();

        builder.embed_new_entities("embed-model").await.unwrap();

        let inputs = recorder.0.lock().unwrap().clone();
        assert!(inputs.contains(&"Kant: German philosopher".to_string()));
        assert!(inputs.contains(&"Hume".to_string()));

        // Bookkeeping recorded, so a second pass embeds nothing
        builder.embed_new_entities("embed-model").await.unwrap();
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }
}
