//! Embedding generation and vector indexing
//!
//! Architecture:
//! - EmbeddingProvider trait for abstraction over embedding backends
//! - OllamaEmbedder for the local Ollama HTTP service
//! - Persistent HNSW indices for chunk and entity vectors

mod provider;
mod vector_index;

pub use provider::{EmbeddingProvider, OllamaEmbedder};
pub use vector_index::VectorIndex;
