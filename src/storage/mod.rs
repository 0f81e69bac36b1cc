//! Structured storage for documents, chunks and the knowledge graph
//!
//! One SQLite database holds all tables; operations that span multiple rows
//! run inside a single transaction so readers only ever observe committed
//! states.

mod documents;
mod graph;

pub use documents::{ChunkRow, HydratedChunk, KeywordHit, NewChunk, ReplaceOutcome, SourceEntry};
pub use graph::{EntityRow, GraphChunkRow, GraphStats, OrphanCleanup, RelatedEntity, ScoredEntity};

use crate::error::{QuarryError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// SQLite-backed store with migration support
pub struct Store {
    pool: DbPool,
}

impl Store {
    /// Open (or create) the store at the given path
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                QuarryError::io(e, format!("Failed to create database directory: {:?}", parent))
            })?;
        }

        // Pragmas are per-connection in SQLite; the init hook applies them
        // to every connection the pool ever creates, so cascades stay on
        // no matter which pooled connection runs a delete. WAL keeps
        // readers unblocked while a writer holds a transaction.
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| QuarryError::Pool(format!("Failed to create connection pool: {}", e)))?;

        let store = Self { pool };
        store.migrate()?;

        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| QuarryError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Read a value from the settings table
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(value)
    }

    /// Write a value into the settings table
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let entity_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        let relationship_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;

        Ok(StoreStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            entity_count: entity_count as usize,
            relationship_count: relationship_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub entity_count: usize,
    pub relationship_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Documents table
    CREATE TABLE documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        embedding_model TEXT NOT NULL,
        uploaded_at INTEGER NOT NULL,
        UNIQUE(source, embedding_model)
    );

    CREATE INDEX idx_documents_source ON documents(source);

    -- Chunks table
    CREATE TABLE chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id INTEGER NOT NULL,
        chunk_index INTEGER NOT NULL,
        page INTEGER,
        content TEXT NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_document ON chunks(document_id);

    -- Entities table (shared across chunks, deduplicated by name + type)
    CREATE TABLE entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        description TEXT,
        created_at INTEGER NOT NULL,
        UNIQUE(name, type)
    );

    CREATE INDEX idx_entities_name ON entities(name);

    -- Relationships table
    CREATE TABLE relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_entity_id INTEGER NOT NULL,
        target_entity_id INTEGER NOT NULL,
        type TEXT NOT NULL,
        description TEXT,
        weight REAL NOT NULL DEFAULT 1.0,
        UNIQUE(source_entity_id, target_entity_id, type),
        FOREIGN KEY (source_entity_id) REFERENCES entities(id) ON DELETE CASCADE,
        FOREIGN KEY (target_entity_id) REFERENCES entities(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_relationships_source ON relationships(source_entity_id);
    CREATE INDEX idx_relationships_target ON relationships(target_entity_id);

    -- Entity mentions (one row per entity occurrence in a chunk)
    CREATE TABLE entity_mentions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id INTEGER NOT NULL,
        chunk_id INTEGER NOT NULL,
        mention_text TEXT,
        confidence REAL NOT NULL DEFAULT 1.0,
        UNIQUE(entity_id, chunk_id),
        FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE,
        FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_entity_mentions_entity ON entity_mentions(entity_id);
    CREATE INDEX idx_entity_mentions_chunk ON entity_mentions(chunk_id);

    -- Relationship mentions
    CREATE TABLE relationship_mentions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        relationship_id INTEGER NOT NULL,
        chunk_id INTEGER NOT NULL,
        context TEXT,
        confidence REAL NOT NULL DEFAULT 1.0,
        UNIQUE(relationship_id, chunk_id),
        FOREIGN KEY (relationship_id) REFERENCES relationships(id) ON DELETE CASCADE,
        FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_relationship_mentions_rel ON relationship_mentions(relationship_id);
    CREATE INDEX idx_relationship_mentions_chunk ON relationship_mentions(chunk_id);

    -- Bookkeeping: which entity has a vector for which embedding model.
    -- The vectors themselves live in the entity vector index on disk.
    CREATE TABLE entity_embeddings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id INTEGER NOT NULL,
        embedding_model TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        UNIQUE(entity_id, embedding_model),
        FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE
    );

    -- Process-wide settings (active embedding model)
    CREATE TABLE settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");

        let _store = Store::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");

        let store = Store::open(&db_path).unwrap();

        let conn = store.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_schema_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");

        let store = Store::open(&db_path).unwrap();
        let conn = store.get_conn().unwrap();

        let tables = vec![
            "documents",
            "chunks",
            "entities",
            "relationships",
            "entity_mentions",
            "relationship_mentions",
            "entity_embeddings",
            "settings",
        ];

        for table in tables {
            let count: i32 = conn
                .query_row(
                    &format!(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='{}'",
                        table
                    ),
                    [],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");

        let store = Store::open(&db_path).unwrap();
        let conn = store.get_conn().unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();

        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_foreign_keys_enabled_on_every_pooled_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");

        let store = Store::open(&db_path).unwrap();

        // Holding the first connection forces the pool to create a second
        let first = store.get_conn().unwrap();
        let second = store.get_conn().unwrap();

        for conn in [&first, &second] {
            let fk_enabled: i32 = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert_eq!(fk_enabled, 1);
        }
    }

    #[test]
    fn test_settings_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(&temp_dir.path().join("store.db")).unwrap();

        assert_eq!(store.get_setting("active_model").unwrap(), None);

        store.set_setting("active_model", "nomic-embed-text").unwrap();
        assert_eq!(
            store.get_setting("active_model").unwrap(),
            Some("nomic-embed-text".to_string())
        );

        store.set_setting("active_model", "mxbai-embed-large").unwrap();
        assert_eq!(
            store.get_setting("active_model").unwrap(),
            Some("mxbai-embed-large".to_string())
        );
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");

        {
            let store = Store::open(&db_path).unwrap();
            store.set_setting("k", "v").unwrap();
        }

        let store = Store::open(&db_path).unwrap();
        assert_eq!(store.get_setting("k").unwrap(), Some("v".to_string()));
    }
}
