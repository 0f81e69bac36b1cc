//! Entity and relationship extraction from chunk text
//!
//! One responsibility: turn a chunk's text into a normalized set of
//! entities and relationships by calling the generation model with a fixed
//! prompt, then projecting the (possibly damaged) JSON onto the ontology.
//! Items that fail validation are dropped; a chunk whose output cannot be
//! parsed at all is skipped by the caller.

mod json_repair;

pub use json_repair::parse_llm_json;

use crate::error::{QuarryError, Result};
use crate::llm::{GenerateOptions, Generator};
use crate::ontology::{EntityKind, RelationKind};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Entity extracted from one chunk, validated against the ontology
#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub name: String,
    pub kind: EntityKind,
    pub description: Option<String>,
    pub confidence: f64,
}

/// Relationship extracted from one chunk
#[derive(Debug, Clone)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    pub kind: RelationKind,
    pub description: Option<String>,
    pub weight: f64,
    pub confidence: f64,
}

/// Validated extraction result for one chunk
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

const EXTRACTION_PROMPT: &str = r#"You are an information extraction system for research documents.

Extract the entities and relationships present in the text below.

Entity types (use exactly these):
PERSON, TOPIC, RESEARCH_METHOD, PAPER, CONCEPT, ORGANIZATION, DATASET

Relationship types (use exactly these):
AUTHORED, AFFILIATED_WITH, CITES, ABOUT, STUDIES, USES_METHOD, USES_DATASET, BASED_ON, EXTENDS, CONTRADICTS, PROPOSES, RELATED_TO

Respond with JSON only, in this exact shape:
{
  "entities": [
    {"name": "...", "type": "...", "description": "..."}
  ],
  "relationships": [
    {"source": "...", "target": "...", "type": "...", "description": "...", "weight": 1.0}
  ]
}

Rules:
- Every relationship source and target must appear in the entities list.
- Use empty lists when nothing in the text qualifies.
- Do not invent entities that are not mentioned in the text.

Text:
"#;

/// Calls the generation model and validates its output
pub struct Extractor {
    generator: Arc<dyn Generator>,
    temperature: f32,
}

impl Extractor {
    pub fn new(generator: Arc<dyn Generator>, temperature: f32) -> Self {
        Self {
            generator,
            temperature,
        }
    }

    /// Extract entities and relationships from one chunk's text
    pub async fn extract(&self, model: &str, chunk_text: &str) -> Result<Extraction> {
        let prompt = format!("{}{}", EXTRACTION_PROMPT, chunk_text);

        let generation = self
            .generator
            .generate(
                model,
                &prompt,
                GenerateOptions {
                    temperature: self.temperature,
                    num_predict: None,
                    format_json: true,
                },
            )
            .await?;

        let raw = generation
            .text()
            .ok_or_else(|| QuarryError::ExtractionParse("empty model output".to_string()))?;

        let value = parse_llm_json(raw).ok_or_else(|| {
            QuarryError::ExtractionParse(format!(
                "unrecoverable JSON ({} chars)",
                raw.chars().count()
            ))
        })?;

        Ok(project_onto_ontology(&value))
    }
}

/// Project a parsed JSON value onto the ontology, silently dropping
/// anything that fails validation
fn project_onto_ontology(value: &Value) -> Extraction {
    let mut extraction = Extraction::default();
    let mut known: HashMap<String, EntityKind> = HashMap::new();

    for item in array_of(value, "entities") {
        let name = match non_empty_string(item, "name").map(normalize_name) {
            Some(n) => n,
            None => continue,
        };
        let kind = match item
            .get("type")
            .and_then(Value::as_str)
            .and_then(EntityKind::parse)
        {
            Some(k) => k,
            None => {
                tracing::debug!("Dropping entity with invalid type: {:?}", item.get("type"));
                continue;
            }
        };

        let key = name.to_lowercase();
        if known.contains_key(&key) {
            continue;
        }
        known.insert(key, kind);

        extraction.entities.push(ExtractedEntity {
            name,
            kind,
            description: non_empty_string(item, "description").map(str::to_string),
            confidence: confidence_of(item),
        });
    }

    for item in array_of(value, "relationships") {
        let source = match non_empty_string(item, "source").map(normalize_name) {
            Some(s) => s,
            None => continue,
        };
        let target = match non_empty_string(item, "target").map(normalize_name) {
            Some(t) => t,
            None => continue,
        };

        let kind = match item
            .get("type")
            .and_then(Value::as_str)
            .and_then(RelationKind::parse)
        {
            Some(k) => k,
            None => {
                tracing::debug!(
                    "Dropping relationship with invalid type: {:?}",
                    item.get("type")
                );
                continue;
            }
        };

        // Both endpoints must be among the extracted entities
        let source_kind = match known.get(&source.to_lowercase()) {
            Some(k) => *k,
            None => {
                tracing::debug!("Dropping relationship with unknown source '{}'", source);
                continue;
            }
        };
        let target_kind = match known.get(&target.to_lowercase()) {
            Some(k) => *k,
            None => {
                tracing::debug!("Dropping relationship with unknown target '{}'", target);
                continue;
            }
        };

        if !kind.permits(source_kind, target_kind) {
            tracing::debug!(
                "Dropping {} relationship with endpoint types {} -> {}",
                kind.as_str(),
                source_kind.as_str(),
                target_kind.as_str()
            );
            continue;
        }

        let weight = item
            .get("weight")
            .and_then(Value::as_f64)
            .filter(|w| w.is_finite() && *w >= 0.0)
            .unwrap_or(1.0);

        extraction.relationships.push(ExtractedRelationship {
            source,
            target,
            kind,
            description: non_empty_string(item, "description").map(str::to_string),
            weight,
            confidence: confidence_of(item),
        });
    }

    extraction
}

fn array_of<'a>(value: &'a Value, field: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|v| v.as_slice())
        .unwrap_or(&[])
        .iter()
}

fn non_empty_string<'a>(item: &'a Value, field: &str) -> Option<&'a str> {
    item.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn confidence_of(item: &Value) -> f64 {
    item.get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(1.0)
}

/// Collapse inner whitespace and trim
fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Generation;
    use async_trait::async_trait;

    /// Generator returning a fixed response
    struct ScriptedGenerator {
        response: Option<String>,
        reasoning: Option<String>,
    }

    impl ScriptedGenerator {
        fn responding(text: &str) -> Self {
            Self {
                response: Some(text.to_string()),
                reasoning: None,
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _options: GenerateOptions,
        ) -> Result<Generation> {
            Ok(Generation {
                response: self.response.clone(),
                reasoning: self.reasoning.clone(),
            })
        }
    }

    fn extractor(gen: ScriptedGenerator) -> Extractor {
        Extractor::new(Arc::new(gen), 0.1)
    }

    #[tokio::test]
    async fn test_valid_extraction() {
        let response = r#"{
            "entities": [
                {"name": "Korsgaard", "type": "PERSON"},
                {"name": "Kant", "type": "PERSON", "description": "Philosopher"}
            ],
            "relationships": [
                {"source": "Korsgaard", "target": "Kant", "type": "STUDIES", "weight": 2.0}
            ]
        }"#;

        let extraction = extractor(ScriptedGenerator::responding(response))
            .extract("m", "text")
            .await
            .unwrap();

        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(extraction.relationships.len(), 1);
        assert_eq!(extraction.relationships[0].kind, RelationKind::Studies);
        assert_eq!(extraction.relationships[0].weight, 2.0);
    }

    #[tokio::test]
    async fn test_fenced_and_quoted_output_is_repaired() {
        let response = "```json\n{entities: [{'name': 'Kant', 'type': 'PERSON'}], relationships: []}\n```";

        let extraction = extractor(ScriptedGenerator::responding(response))
            .extract("m", "text")
            .await
            .unwrap();

        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.entities[0].name, "Kant");
    }

    #[tokio::test]
    async fn test_invalid_entity_type_dropped() {
        let response = r#"{
            "entities": [
                {"name": "Kant", "type": "PERSON"},
                {"name": "Something", "type": "WIDGET"}
            ],
            "relationships": []
        }"#;

        let extraction = extractor(ScriptedGenerator::responding(response))
            .extract("m", "text")
            .await
            .unwrap();

        assert_eq!(extraction.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_relationship_with_unknown_endpoint_dropped() {
        let response = r#"{
            "entities": [{"name": "Kant", "type": "PERSON"}],
            "relationships": [
                {"source": "Kant", "target": "Ghost", "type": "STUDIES"}
            ]
        }"#;

        let extraction = extractor(ScriptedGenerator::responding(response))
            .extract("m", "text")
            .await
            .unwrap();

        assert!(extraction.relationships.is_empty());
    }

    #[tokio::test]
    async fn test_relationship_violating_type_pair_dropped() {
        // AUTHORED requires PERSON -> PAPER
        let response = r#"{
            "entities": [
                {"name": "Kant", "type": "PERSON"},
                {"name": "Ethics", "type": "TOPIC"}
            ],
            "relationships": [
                {"source": "Kant", "target": "Ethics", "type": "AUTHORED"},
                {"source": "Kant", "target": "Ethics", "type": "RELATED_TO"}
            ]
        }"#;

        let extraction = extractor(ScriptedGenerator::responding(response))
            .extract("m", "text")
            .await
            .unwrap();

        assert_eq!(extraction.relationships.len(), 1);
        assert_eq!(extraction.relationships[0].kind, RelationKind::RelatedTo);
    }

    #[tokio::test]
    async fn test_duplicate_entities_collapse() {
        let response = r#"{
            "entities": [
                {"name": "Kant", "type": "PERSON"},
                {"name": "  kant ", "type": "PERSON"}
            ],
            "relationships": []
        }"#;

        let extraction = extractor(ScriptedGenerator::responding(response))
            .extract("m", "text")
            .await
            .unwrap();

        assert_eq!(extraction.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_output_is_parse_failure() {
        let gen = ScriptedGenerator {
            response: None,
            reasoning: None,
        };
        let err = extractor(gen).extract("m", "text").await.unwrap_err();
        assert!(matches!(err, QuarryError::ExtractionParse(_)));
    }

    #[tokio::test]
    async fn test_reasoning_field_used_when_response_empty() {
        let gen = ScriptedGenerator {
            response: Some(String::new()),
            reasoning: Some(r#"{"entities": [{"name": "Hume", "type": "PERSON"}], "relationships": []}"#.to_string()),
        };

        let extraction = extractor(gen).extract("m", "text").await.unwrap();
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.entities[0].name, "Hume");
    }

    #[tokio::test]
    async fn test_garbage_output_is_parse_failure() {
        let err = extractor(ScriptedGenerator::responding("I could not find anything."))
            .extract("m", "text")
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::ExtractionParse(_)));
    }

    #[tokio::test]
    async fn test_confidence_clamped() {
        let response = r#"{
            "entities": [
                {"name": "Kant", "type": "PERSON", "confidence": 7.5},
                {"name": "Hume", "type": "PERSON", "confidence": 0.4}
            ],
            "relationships": []
        }"#;

        let extraction = extractor(ScriptedGenerator::responding(response))
            .extract("m", "text")
            .await
            .unwrap();

        assert_eq!(extraction.entities[0].confidence, 1.0);
        assert_eq!(extraction.entities[1].confidence, 0.4);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Immanuel   Kant "), "Immanuel Kant");
    }
}
