//! Knowledge graph tables: entities, relationships and their mentions
//!
//! Entities are shared across chunks and referenced through mentions; they
//! exist only while at least one mention points at them. `cleanup_orphans`
//! is the authoritative cleanup, never a cascade from chunk deletion.

use super::documents::ChunkRow;
use super::Store;
use crate::error::Result;
use crate::ontology::type_weight_of;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Entity row as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
}

/// Entity scored by popularity for keyword seeding
#[derive(Debug, Clone)]
pub struct ScoredEntity {
    pub entity: EntityRow,
    pub score: f64,
}

/// Neighbor entity reached through a relationship
#[derive(Debug, Clone)]
pub struct RelatedEntity {
    pub entity: EntityRow,
    pub relation_type: String,
    pub score: f64,
}

/// Chunk recalled through the graph, with its aggregated entity annotations
#[derive(Debug, Clone)]
pub struct GraphChunkRow {
    pub chunk: ChunkRow,
    pub source: String,
    pub entity_count: i64,
}

/// Result of an orphan cleanup pass
#[derive(Debug, Default)]
pub struct OrphanCleanup {
    /// Ids of entities removed (their vectors must be pruned by the caller)
    pub entity_ids: Vec<i64>,
    pub relationships_removed: usize,
}

/// Graph table statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub entities: usize,
    pub relationships: usize,
    pub entity_mentions: usize,
    pub relationship_mentions: usize,
}

impl Store {
    /// Insert or update an entity, idempotent on (name, type).
    /// A provided description overwrites an existing one.
    pub fn upsert_entity(
        &self,
        name: &str,
        kind: &str,
        description: Option<&str>,
    ) -> Result<i64> {
        let conn = self.get_conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM entities WHERE name = ?1 AND type = ?2",
                params![name, kind],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            if let Some(desc) = description {
                conn.execute(
                    "UPDATE entities SET description = ?1 WHERE id = ?2",
                    params![desc, id],
                )?;
            }
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO entities (name, type, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, kind, description, Utc::now().timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert or update a relationship, idempotent on (source, target, type)
    pub fn upsert_relationship(
        &self,
        source_entity_id: i64,
        target_entity_id: i64,
        kind: &str,
        description: Option<&str>,
        weight: Option<f64>,
    ) -> Result<i64> {
        let conn = self.get_conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM relationships
                 WHERE source_entity_id = ?1 AND target_entity_id = ?2 AND type = ?3",
                params![source_entity_id, target_entity_id, kind],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            if let Some(desc) = description {
                conn.execute(
                    "UPDATE relationships SET description = ?1 WHERE id = ?2",
                    params![desc, id],
                )?;
            }
            if let Some(w) = weight {
                conn.execute(
                    "UPDATE relationships SET weight = ?1 WHERE id = ?2",
                    params![w, id],
                )?;
            }
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO relationships (source_entity_id, target_entity_id, type, description, weight)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source_entity_id,
                target_entity_id,
                kind,
                description,
                weight.unwrap_or(1.0)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record an entity occurrence in a chunk, unique per (entity, chunk).
    /// Returns whether a new row was inserted.
    pub fn insert_entity_mention(
        &self,
        entity_id: i64,
        chunk_id: i64,
        mention_text: Option<&str>,
        confidence: f64,
    ) -> Result<bool> {
        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO entity_mentions (entity_id, chunk_id, mention_text, confidence)
             VALUES (?1, ?2, ?3, ?4)",
            params![entity_id, chunk_id, mention_text, confidence],
        )?;
        Ok(inserted > 0)
    }

    /// Record a relationship occurrence in a chunk
    pub fn insert_relationship_mention(
        &self,
        relationship_id: i64,
        chunk_id: i64,
        context: Option<&str>,
        confidence: f64,
    ) -> Result<bool> {
        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO relationship_mentions
                 (relationship_id, chunk_id, context, confidence)
             VALUES (?1, ?2, ?3, ?4)",
            params![relationship_id, chunk_id, context, confidence],
        )?;
        Ok(inserted > 0)
    }

    /// Whether a chunk already has at least one entity mention
    pub fn chunk_has_entity_mentions(&self, chunk_id: i64) -> Result<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_mentions WHERE chunk_id = ?1",
            params![chunk_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Entities mentioned in a chunk
    pub fn entities_of_chunk(&self, chunk_id: i64) -> Result<Vec<EntityRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.type, e.description
             FROM entities e JOIN entity_mentions m ON m.entity_id = e.id
             WHERE m.chunk_id = ?1 ORDER BY e.id",
        )?;
        let rows = stmt
            .query_map(params![chunk_id], |row| {
                Ok(EntityRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    kind: row.get(2)?,
                    description: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Entity by id
    pub fn get_entity(&self, entity_id: i64) -> Result<Option<EntityRow>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, type, description FROM entities WHERE id = ?1",
                params![entity_id],
                |row| {
                    Ok(EntityRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        description: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Chunks mentioning any of the given entities, ordered by how many
    /// distinct entities of the set they mention, then by ordinal index.
    pub fn chunks_of_entities(
        &self,
        entity_ids: &[i64],
        max: usize,
    ) -> Result<Vec<GraphChunkRow>> {
        if entity_ids.is_empty() || max == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let id_list = join_ids(entity_ids);
        let sql = format!(
            "SELECT c.id, c.document_id, c.chunk_index, c.page, c.content, d.source,
                    COUNT(DISTINCT m.entity_id) AS entity_count
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             JOIN entity_mentions m ON m.chunk_id = c.id
             WHERE m.entity_id IN ({})
             GROUP BY c.id
             ORDER BY entity_count DESC, c.chunk_index ASC
             LIMIT ?1",
            id_list
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![max as i64], |row| {
                Ok(GraphChunkRow {
                    chunk: ChunkRow {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_index: row.get(2)?,
                        page: row.get(3)?,
                        content: row.get(4)?,
                    },
                    source: row.get(5)?,
                    entity_count: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Entities connected to any seed by a relationship in either direction,
    /// excluding the seeds, scored by stored weight times the relationship
    /// type weight. Multiple connecting relationships accumulate.
    pub fn related_entities(
        &self,
        seed_ids: &[i64],
        max: usize,
    ) -> Result<Vec<RelatedEntity>> {
        if seed_ids.is_empty() || max == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let id_list = join_ids(seed_ids);
        let sql = format!(
            "SELECT e.id, e.name, e.type, e.description, r.type, r.weight
             FROM relationships r
             JOIN entities e ON e.id = CASE
                 WHEN r.source_entity_id IN ({ids}) THEN r.target_entity_id
                 ELSE r.source_entity_id
             END
             WHERE (r.source_entity_id IN ({ids}) OR r.target_entity_id IN ({ids}))
               AND e.id NOT IN ({ids})",
            ids = id_list
        );

        let mut stmt = conn.prepare(&sql)?;
        let edges: Vec<(EntityRow, String, f64)> = stmt
            .query_map([], |row| {
                Ok((
                    EntityRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        description: row.get(3)?,
                    },
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut by_id: std::collections::HashMap<i64, RelatedEntity> =
            std::collections::HashMap::new();
        for (entity, rel_type, weight) in edges {
            let score = weight * type_weight_of(&rel_type);
            by_id
                .entry(entity.id)
                .and_modify(|r| r.score += score)
                .or_insert(RelatedEntity {
                    entity,
                    relation_type: rel_type,
                    score,
                });
        }

        let mut neighbors: Vec<RelatedEntity> = by_id.into_values().collect();
        neighbors.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.entity.id.cmp(&b.entity.id))
        });
        neighbors.truncate(max);
        Ok(neighbors)
    }

    /// Substring match on entity names, ranked by mention count plus a
    /// log-scaled popularity bonus.
    pub fn keyword_entity_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredEntity>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.type, e.description,
                    (SELECT COUNT(*) FROM entity_mentions m WHERE m.entity_id = e.id) AS mentions
             FROM entities e
             WHERE LOWER(e.name) LIKE '%' || ?1 || '%' ESCAPE '\\'
             ORDER BY mentions DESC, e.id ASC
             LIMIT ?2",
        )?;

        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");

        let rows = stmt
            .query_map(params![escaped, limit as i64], |row| {
                let mentions: i64 = row.get(4)?;
                Ok(ScoredEntity {
                    entity: EntityRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        description: row.get(3)?,
                    },
                    score: mentions as f64 + (1.0 + mentions as f64).ln(),
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Entities that have no vector bookkeeping row for the given model
    pub fn entities_missing_vectors(&self, model: &str) -> Result<Vec<EntityRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.type, e.description
             FROM entities e
             WHERE NOT EXISTS (
                 SELECT 1 FROM entity_embeddings ee
                 WHERE ee.entity_id = e.id AND ee.embedding_model = ?1
             )
             ORDER BY e.id",
        )?;
        let rows = stmt
            .query_map(params![model], |row| {
                Ok(EntityRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    kind: row.get(2)?,
                    description: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Record that an entity has a vector for the given model
    pub fn record_entity_embedding(
        &self,
        entity_id: i64,
        model: &str,
        dimension: usize,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO entity_embeddings (entity_id, embedding_model, dimension)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(entity_id, embedding_model) DO UPDATE SET dimension = excluded.dimension",
            params![entity_id, model, dimension as i64],
        )?;
        Ok(())
    }

    /// Delete entities with no mentions, then relationships with no mentions.
    /// Entity deletion cascades the relationships that referenced them.
    pub fn cleanup_orphans(&self) -> Result<OrphanCleanup> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut stmt = tx.prepare(
            "SELECT id FROM entities
             WHERE id NOT IN (SELECT DISTINCT entity_id FROM entity_mentions)",
        )?;
        let entity_ids: Vec<i64> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        if !entity_ids.is_empty() {
            let sql = format!("DELETE FROM entities WHERE id IN ({})", join_ids(&entity_ids));
            tx.execute(&sql, [])?;
        }

        let relationships_removed = tx.execute(
            "DELETE FROM relationships
             WHERE id NOT IN (SELECT DISTINCT relationship_id FROM relationship_mentions)",
            [],
        )?;

        tx.commit()?;

        if !entity_ids.is_empty() || relationships_removed > 0 {
            tracing::debug!(
                "Orphan cleanup removed {} entities, {} relationships",
                entity_ids.len(),
                relationships_removed
            );
        }

        Ok(OrphanCleanup {
            entity_ids,
            relationships_removed,
        })
    }

    /// Chunks of a document that already carry at least one entity mention
    pub fn count_chunks_with_mentions(&self, document_id: i64) -> Result<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT c.id)
             FROM chunks c JOIN entity_mentions m ON m.chunk_id = c.id
             WHERE c.document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Graph table statistics
    pub fn graph_stats(&self) -> Result<GraphStats> {
        let conn = self.get_conn()?;
        let entities: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
        let relationships: i64 =
            conn.query_row("SELECT COUNT(*) FROM relationships", [], |r| r.get(0))?;
        let entity_mentions: i64 =
            conn.query_row("SELECT COUNT(*) FROM entity_mentions", [], |r| r.get(0))?;
        let relationship_mentions: i64 =
            conn.query_row("SELECT COUNT(*) FROM relationship_mentions", [], |r| r.get(0))?;

        Ok(GraphStats {
            entities: entities as usize,
            relationships: relationships as usize,
            entity_mentions: entity_mentions as usize,
            relationship_mentions: relationship_mentions as usize,
        })
    }
}

/// Render integer ids as a SQL IN-list. Ids come from SQLite rowids, never
/// from user input.
fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
