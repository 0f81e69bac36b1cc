//! Document and chunk operations, plus keyword search over chunk text

use super::Store;
use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Chunk to be inserted during ingest
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub page: Option<i64>,
    pub content: String,
}

/// Chunk row as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRow {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub page: Option<i64>,
    pub content: String,
}

/// Chunk row joined with its document source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydratedChunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub page: Option<i64>,
    pub content: String,
    pub source: String,
}

/// Result of the transactional document + chunk replacement
#[derive(Debug)]
pub struct ReplaceOutcome {
    pub document_id: i64,
    pub existed: bool,
    /// Chunk ids removed from a previous ingest of the same source
    pub old_chunk_ids: Vec<i64>,
    /// Chunk ids inserted by this ingest, in ordinal order
    pub new_chunk_ids: Vec<i64>,
}

/// Source listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub source: String,
    pub models: Vec<String>,
}

/// Scored keyword search hit
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub chunk_id: i64,
    pub score: f64,
}

impl Store {
    /// Insert a document, idempotent on (source, embedding_model).
    /// Returns the document id and whether the pair already existed.
    pub fn insert_document(&self, source: &str, model: &str) -> Result<(i64, bool)> {
        let conn = self.get_conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM documents WHERE source = ?1 AND embedding_model = ?2",
                params![source, model],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok((id, true));
        }

        conn.execute(
            "INSERT INTO documents (source, embedding_model, uploaded_at) VALUES (?1, ?2, ?3)",
            params![source, model, Utc::now().timestamp()],
        )?;

        Ok((conn.last_insert_rowid(), false))
    }

    /// Atomically insert (or replace) a document and its chunks.
    ///
    /// If the (source, model) pair exists, the previous chunks are deleted
    /// inside the same transaction; either the full new state is visible to
    /// later readers, or none of it.
    pub fn replace_document_chunks(
        &self,
        source: &str,
        model: &str,
        chunks: &[NewChunk],
    ) -> Result<ReplaceOutcome> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM documents WHERE source = ?1 AND embedding_model = ?2",
                params![source, model],
                |row| row.get(0),
            )
            .optional()?;

        let (document_id, existed, old_chunk_ids) = match existing {
            Some(id) => {
                let mut stmt =
                    tx.prepare("SELECT id FROM chunks WHERE document_id = ?1 ORDER BY chunk_index")?;
                let old_ids: Vec<i64> = stmt
                    .query_map(params![id], |row| row.get(0))?
                    .collect::<std::result::Result<_, _>>()?;
                drop(stmt);

                tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id])?;
                (id, true, old_ids)
            }
            None => {
                tx.execute(
                    "INSERT INTO documents (source, embedding_model, uploaded_at) VALUES (?1, ?2, ?3)",
                    params![source, model, Utc::now().timestamp()],
                )?;
                (tx.last_insert_rowid(), false, Vec::new())
            }
        };

        let mut new_chunk_ids = Vec::with_capacity(chunks.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (document_id, chunk_index, page, content)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    document_id,
                    chunk.chunk_index,
                    chunk.page,
                    chunk.content
                ])?;
                new_chunk_ids.push(tx.last_insert_rowid());
            }
        }

        tx.commit()?;

        Ok(ReplaceOutcome {
            document_id,
            existed,
            old_chunk_ids,
            new_chunk_ids,
        })
    }

    /// All chunks of a document, ordered by ordinal index
    pub fn get_chunks(&self, document_id: i64) -> Result<Vec<ChunkRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, chunk_index, page, content
             FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok(ChunkRow {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    chunk_index: row.get(2)?,
                    page: row.get(3)?,
                    content: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// A single chunk by id
    pub fn get_chunk(&self, chunk_id: i64) -> Result<Option<ChunkRow>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT id, document_id, chunk_index, page, content FROM chunks WHERE id = ?1",
                params![chunk_id],
                |row| {
                    Ok(ChunkRow {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_index: row.get(2)?,
                        page: row.get(3)?,
                        content: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// A chunk joined with its document source
    pub fn get_hydrated_chunk(&self, chunk_id: i64) -> Result<Option<HydratedChunk>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT c.id, c.document_id, c.chunk_index, c.page, c.content, d.source
                 FROM chunks c JOIN documents d ON d.id = c.document_id
                 WHERE c.id = ?1",
                params![chunk_id],
                |row| {
                    Ok(HydratedChunk {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_index: row.get(2)?,
                        page: row.get(3)?,
                        content: row.get(4)?,
                        source: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// The document id for a source, regardless of embedding model
    pub fn document_id_for_source(&self, source: &str) -> Result<Option<i64>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM documents WHERE source = ?1 ORDER BY id LIMIT 1",
                params![source],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Chunk ids of a document, ordered by ordinal index
    pub fn chunk_ids_of_document(&self, document_id: i64) -> Result<Vec<i64>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM chunks WHERE document_id = ?1 ORDER BY chunk_index")?;
        let ids = stmt
            .query_map(params![document_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(ids)
    }

    /// Delete every document stored under the source path.
    /// Returns the removed chunk ids so vector index entries can be pruned.
    pub fn delete_document(&self, source: &str) -> Result<Option<Vec<i64>>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut stmt = tx.prepare("SELECT id FROM documents WHERE source = ?1")?;
        let doc_ids: Vec<i64> = stmt
            .query_map(params![source], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        if doc_ids.is_empty() {
            return Ok(None);
        }

        let mut chunk_ids = Vec::new();
        for doc_id in &doc_ids {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
            let ids: Vec<i64> = stmt
                .query_map(params![doc_id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            chunk_ids.extend(ids);
        }

        // Chunks and mentions cascade from here
        tx.execute("DELETE FROM documents WHERE source = ?1", params![source])?;
        tx.commit()?;

        Ok(Some(chunk_ids))
    }

    /// Delete one document row by id (ingest compensation path).
    /// Returns the removed chunk ids.
    pub fn delete_document_by_id(&self, document_id: i64) -> Result<Vec<i64>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut stmt = tx.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
        let chunk_ids: Vec<i64> = stmt
            .query_map(params![document_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        tx.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;
        tx.commit()?;

        Ok(chunk_ids)
    }

    /// Every source with the embedding models it was ingested under
    pub fn list_sources(&self) -> Result<Vec<SourceEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT source, embedding_model FROM documents ORDER BY source, embedding_model",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let mut entries: Vec<SourceEntry> = Vec::new();
        for (source, model) in rows {
            match entries.last_mut() {
                Some(entry) if entry.source == source => entry.models.push(model),
                _ => entries.push(SourceEntry {
                    source,
                    models: vec![model],
                }),
            }
        }
        Ok(entries)
    }

    /// Embedding model names appearing on any stored vector bookkeeping
    pub fn distinct_embedding_models(&self) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT embedding_model FROM documents
             UNION
             SELECT DISTINCT embedding_model FROM entity_embeddings
             ORDER BY 1",
        )?;
        let models = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(models)
    }

    /// Remove every document and chunk (model switch cascade)
    pub fn clear_documents(&self) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks", [])?;
        tx.execute("DELETE FROM documents", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Scored substring search over chunk text.
    ///
    /// Tokenizes the query on whitespace, finds chunks containing any token
    /// (capped at `k * limit_multiplier` candidates), and scores each
    /// candidate by the total number of non-overlapping case-insensitive
    /// occurrences across all tokens. Ties break toward the smaller chunk id.
    pub fn keyword_search(
        &self,
        query: &str,
        k: usize,
        limit_multiplier: usize,
    ) -> Result<Vec<KeywordHit>> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();

        if tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;

        let clause = tokens
            .iter()
            .enumerate()
            .map(|(i, _)| format!("LOWER(content) LIKE ?{} ESCAPE '\\'", i + 2))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT id, content FROM chunks WHERE {} ORDER BY id LIMIT ?1",
            clause
        );

        let limit = (k * limit_multiplier.max(1)) as i64;
        let patterns: Vec<String> = tokens
            .iter()
            .map(|t| format!("%{}%", escape_like(t)))
            .collect();

        let mut stmt = conn.prepare(&sql)?;
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&limit];
        for p in &patterns {
            sql_params.push(p);
        }

        let candidates: Vec<(i64, String)> = stmt
            .query_map(sql_params.as_slice(), |row| {
                Ok((row.get(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut hits: Vec<KeywordHit> = candidates
            .into_iter()
            .map(|(id, content)| {
                let lowered = content.to_lowercase();
                let score: usize = tokens.iter().map(|t| lowered.matches(t.as_str()).count()).sum();
                KeywordHit {
                    chunk_id: id,
                    score: score as f64,
                }
            })
            .filter(|h| h.score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);

        Ok(hits)
    }
}

/// Escape LIKE wildcards in a token so it matches literally
fn escape_like(token: &str) -> String {
    token
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
