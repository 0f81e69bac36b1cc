//! Generation service client
//!
//! Used by query rewriting and entity extraction. The backend returns a
//! primary `response` and, for reasoning models, a separate `thinking`
//! field; both are surfaced so callers can fall back when the primary
//! output is empty.

use crate::error::{QuarryError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output envelope of one generation call
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub response: Option<String>,
    pub reasoning: Option<String>,
}

impl Generation {
    /// The primary output, falling back to the reasoning field when the
    /// primary is empty
    pub fn text(&self) -> Option<&str> {
        match self.response.as_deref() {
            Some(s) if !s.trim().is_empty() => Some(s),
            _ => match self.reasoning.as_deref() {
                Some(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            },
        }
    }
}

/// Options for one generation call
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_predict: Option<u32>,
    /// Ask the backend to constrain output to JSON
    pub format_json: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            num_predict: None,
            format_json: false,
        }
    }
}

/// Trait for generation backends
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<Generation>;
}

/// Ollama generation client (`POST /api/generate`)
pub struct OllamaGenerator {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuarryError::Generation(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<Generation> {
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
            format: options.format_json.then(|| "json".to_string()),
            options: RequestOptions {
                temperature: options.temperature,
                num_predict: options.num_predict,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| QuarryError::Generation(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuarryError::Generation(format!(
                "Backend returned {}: {}",
                status, body
            )));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| QuarryError::Generation(format!("Invalid response: {}", e)))?;

        Ok(Generation {
            response: Some(result.response).filter(|s| !s.is_empty()),
            reasoning: result.thinking.filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: RequestOptions,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    thinking: Option<String>,
}
