use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the quarry retrieval core
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Source extension is not one of the supported input formats
    #[error("Unsupported format: .{extension} (supported: .txt, .md, .pdf)")]
    UnsupportedFormat { extension: String },

    /// Empty or otherwise unusable source path
    #[error("Invalid source path: {0}")]
    InvalidPath(String),

    /// Failure while extracting text from a source document
    #[error("Document parse error: {0}")]
    Parse(String),

    /// Source is not present in the store
    #[error("Source not found: {source_path}")]
    NotFound { source_path: String },

    /// The embedding backend refused or failed the request
    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    /// The active embedding model is absent from the backend
    #[error("Embedding model not installed: {model}")]
    ModelNotInstalled { model: String },

    /// A vector's dimension disagrees with the index's recorded dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The generation backend refused or failed the request
    #[error("Generation service error: {0}")]
    Generation(String),

    /// LLM output could not be coerced into valid JSON after repairs
    #[error("Extraction parse failure: {0}")]
    ExtractionParse(String),

    /// Vector index errors other than dimension mismatches
    #[error("Vector index error: {0}")]
    Index(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuarryError {
    /// Wrap an IO error with context about the failed operation
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    pub fn json(source: serde_json::Error, context: impl Into<String>) -> Self {
        Self::Json {
            source,
            context: context.into(),
        }
    }
}

/// Result type for quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;
