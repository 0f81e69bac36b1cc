//! Embedding provider trait and the Ollama HTTP implementation

use crate::error::{QuarryError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trait for embedding providers
///
/// The model name travels with every call; the active model is process-wide
/// state owned by the governor and must not be cached here.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts
    async fn embed_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Verify the model is installed on the backend
    async fn preflight(&self, model: &str) -> Result<()>;

    /// Generate an embedding for a single text
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(model, &[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| QuarryError::EmbeddingService("No embedding returned".to_string()))
    }
}

/// Ollama embedding client (`POST /api/embed`)
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    batch_size: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, timeout: Duration, batch_size: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuarryError::EmbeddingService(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            batch_size: batch_size.max(1),
        })
    }

    async fn embed_request(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: model.to_string(),
            input: texts.to_vec(),
        };

        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| QuarryError::EmbeddingService(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND && body.contains("not found") {
                return Err(QuarryError::ModelNotInstalled {
                    model: model.to_string(),
                });
            }
            return Err(QuarryError::EmbeddingService(format!(
                "Backend returned {}: {}",
                status, body
            )));
        }

        let result: EmbedResponse = response
            .json()
            .await
            .map_err(|e| QuarryError::EmbeddingService(format!("Invalid response: {}", e)))?;

        if result.embeddings.len() != texts.len() {
            return Err(QuarryError::EmbeddingService(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                result.embeddings.len()
            )));
        }

        Ok(result.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_request(model, batch).await?);
        }
        Ok(vectors)
    }

    async fn preflight(&self, model: &str) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| QuarryError::EmbeddingService(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(QuarryError::EmbeddingService(format!(
                "Backend returned {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| QuarryError::EmbeddingService(format!("Invalid response: {}", e)))?;

        let wanted = model.trim_end_matches(":latest");
        let installed = tags
            .models
            .iter()
            .any(|m| m.name == model || m.name.trim_end_matches(":latest") == wanted);

        if installed {
            Ok(())
        } else {
            Err(QuarryError::ModelNotInstalled {
                model: model.to_string(),
            })
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}
