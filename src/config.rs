//! Configuration management for quarry
//!
//! Loads the TOML configuration file, applies environment overrides and
//! validates values before any component is constructed.

use crate::error::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub ollama: OllamaConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub index: IndexConfig,
    pub extraction: ExtractionConfig,
    pub retrieval: RetrievalConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Ollama backend configuration (shared by embedding and generation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Default active model, used only when the store has no recorded model
    pub model: String,
    pub batch_size: usize,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// HNSW index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub ef_search: usize,
}

/// Entity extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Chunks per extraction batch (also the concurrency bound)
    pub batch_size: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_entities: usize,
    pub max_related: usize,
    pub max_graph_chunks: usize,
    pub limit_multiplier: usize,
    pub rewrite_temperature: f32,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QuarryError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| QuarryError::io(e, format!("Failed to read config file: {:?}", path)))?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load from the default path, falling back to defaults if absent
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => Self::default_path()?,
        };

        if path.exists() {
            Self::load(&path)
        } else {
            let mut config = Config::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| QuarryError::io(e, format!("Failed to write config file: {:?}", path)))?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: QUARRY_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("QUARRY_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "OLLAMA__BASE_URL" => {
                self.ollama.base_url = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__BATCH_SIZE" => {
                self.embedding.batch_size =
                    value.parse().map_err(|_| QuarryError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "EXTRACTION__BATCH_SIZE" => {
                self.extraction.batch_size =
                    value.parse().map_err(|_| QuarryError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(QuarryError::InvalidConfigValue {
                path: "chunking.chunk_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(QuarryError::InvalidConfigValue {
                path: "chunking.chunk_overlap".to_string(),
                message: "must be smaller than chunk_size".to_string(),
            });
        }
        if self.embedding.batch_size == 0 {
            return Err(QuarryError::InvalidConfigValue {
                path: "embedding.batch_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.extraction.batch_size == 0 {
            return Err(QuarryError::InvalidConfigValue {
                path: "extraction.batch_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.retrieval.limit_multiplier == 0 {
            return Err(QuarryError::InvalidConfigValue {
                path: "retrieval.limit_multiplier".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.ollama.base_url.is_empty() {
            return Err(QuarryError::InvalidConfigValue {
                path: "ollama.base_url".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("quarry").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".quarry"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".quarry"));

        Self {
            storage: StorageConfig { data_dir },
            ollama: OllamaConfig {
                base_url: "http://localhost:11434".to_string(),
                request_timeout_secs: 120,
            },
            embedding: EmbeddingConfig {
                model: "nomic-embed-text".to_string(),
                batch_size: 16,
            },
            chunking: ChunkingConfig {
                chunk_size: 500,
                chunk_overlap: 100,
            },
            index: IndexConfig {
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                ef_search: 50,
            },
            extraction: ExtractionConfig {
                batch_size: 8,
                temperature: 0.1,
                timeout_secs: 90,
            },
            retrieval: RetrievalConfig {
                top_entities: 3,
                max_related: 5,
                max_graph_chunks: 5,
                limit_multiplier: 3,
                rewrite_temperature: 0.2,
            },
        }
    }
}
