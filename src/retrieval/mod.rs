//! Retrieval strategies over the chunk store, vector indices and graph
//!
//! Four selectable strategies: embedding, fulltext, hybrid, and graph
//! augmentation as an orthogonal flag on top of any of them.

mod engine;
mod graph_search;
mod rewrite;

pub use engine::RetrievalEngine;
pub use graph_search::{GraphSearch, GraphSearchParams};
pub use rewrite::rewrite_query;

use serde::{Deserialize, Serialize};

/// Base retrieval strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    Embedding,
    Fulltext,
    Hybrid,
}

/// One message of conversational context for query rewriting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Search options
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    /// Augment results through the entity graph
    pub use_graph: bool,
    /// Chat model used for query rewriting in fulltext mode
    pub chat_model: Option<String>,
    pub chat_history: Vec<ChatMessage>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            use_graph: false,
            chat_model: None,
            chat_history: Vec::new(),
        }
    }
}

/// Which strategy produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalOrigin {
    Embedding,
    Fulltext,
    Graph,
}

/// Entity annotation on a graph-recalled chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTag {
    pub name: String,
    pub kind: String,
}

/// A retrieved chunk with its provenance and score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub source: String,
    pub page: Option<i64>,
    pub chunk_index: i64,
    pub content: String,
    pub score: f32,
    pub origin: RetrievalOrigin,
    pub matched_entities: Vec<EntityTag>,
    pub from_graph: bool,
}
