//! Shared fixtures for integration tests
//!
//! The embedding and generation services are replaced by deterministic
//! in-process doubles so tests run hermetically.

use async_trait::async_trait;
use quarry::config::Config;
use quarry::core::RetrievalCore;
use quarry::embedding::EmbeddingProvider;
use quarry::error::Result;
use quarry::llm::{GenerateOptions, Generation, Generator};
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_DIMENSION: usize = 256;

/// Deterministic hash-bucket embedder: each token increments one dimension
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: TEST_DIMENSION,
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut v = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let cleaned: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if cleaned.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            cleaned.hash(&mut hasher);
            v[(hasher.finish() as usize) % self.dimension] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn preflight(&self, _model: &str) -> Result<()> {
        Ok(())
    }
}

/// Generator that answers with the first rule whose marker substring
/// appears in the prompt; the default is an empty extraction
pub struct RuleGenerator {
    rules: Vec<(String, String)>,
}

impl RuleGenerator {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rules(rules: &[(&str, &str)]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|(marker, json)| (marker.to_string(), json.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl Generator for RuleGenerator {
    async fn generate(
        &self,
        _model: &str,
        prompt: &str,
        _options: GenerateOptions,
    ) -> Result<Generation> {
        let response = self
            .rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, json)| json.clone())
            .unwrap_or_else(|| r#"{"entities": [], "relationships": []}"#.to_string());

        Ok(Generation {
            response: Some(response),
            reasoning: None,
        })
    }
}

/// A core with its data directory inside the tempdir and doubles wired in
pub fn open_core(temp: &TempDir, generator: RuleGenerator) -> RetrievalCore {
    let mut config = Config::default();
    config.storage.data_dir = temp.path().join("data");
    config.embedding.model = "test-embed-model".to_string();
    config.extraction.batch_size = 2;
    // Small chunks so short two-paragraph fixtures split into two chunks
    config.chunking.chunk_size = 80;
    config.chunking.chunk_overlap = 0;

    RetrievalCore::open_with_services(config, Arc::new(HashEmbedder::new()), Arc::new(generator))
        .unwrap()
}

/// Write a text file into the tempdir and return its path
pub fn write_source(temp: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = temp.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Build a minimal uncompressed PDF with one line of text per page
pub fn minimal_pdf(pages: &[&str]) -> Vec<u8> {
    let font_id = 3 + 2 * pages.len();

    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());

    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", 3 + 2 * i))
        .collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        pages.len()
    ));

    for (i, text) in pages.iter().enumerate() {
        let content_id = 4 + 2 * i;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R \
             /Resources << /Font << /F1 {} 0 R >> >> >>",
            content_id, font_id
        ));

        let escaped = text.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
        let stream = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", escaped);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }

    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }

    let xref_offset = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    pdf.push_str("0000000000 65535 f \n");
    for offset in &offsets {
        pdf.push_str(&format!("{:010} 00000 n \n", offset));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    ));

    pdf.into_bytes()
}
