//! Conversational query rewriting for fulltext search
//!
//! Asks the chat model for a handful of search keywords built from the
//! recent conversation. Any failure falls back to the original query; a
//! rewrite must never make retrieval worse than not rewriting.

use super::ChatMessage;
use crate::llm::{GenerateOptions, Generator};

const MIN_KEYWORD_LEN: usize = 3;

/// Rewrite a query into search keywords using conversational context.
/// Returns the original query when the model produces nothing usable.
pub async fn rewrite_query(
    generator: &dyn Generator,
    chat_model: &str,
    chat_history: &[ChatMessage],
    query: &str,
    temperature: f32,
) -> String {
    let context: Vec<String> = chat_history
        .iter()
        .filter(|m| m.role != "system")
        .rev()
        .take(3)
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect();
    let context: Vec<String> = context.into_iter().rev().collect();

    let prompt = format!(
        "Conversation:\n{}\n\nThe user now asks: {}\n\n\
         Produce 3-7 search keywords capturing what to look up.\n\
         Respond with only the keywords, separated by spaces.",
        context.join("\n"),
        query
    );

    let generation = match generator
        .generate(
            chat_model,
            &prompt,
            GenerateOptions {
                temperature,
                num_predict: Some(50),
                format_json: false,
            },
        )
        .await
    {
        Ok(g) => g,
        Err(e) => {
            tracing::warn!("Query rewrite failed, keeping original query: {}", e);
            return query.to_string();
        }
    };

    let raw = match generation.response.as_deref() {
        Some(s) if !s.trim().is_empty() => s.to_lowercase(),
        _ => match generation.reasoning.as_deref() {
            Some(s) if !s.trim().is_empty() => keywords_from_reasoning(&s.to_lowercase()),
            _ => return query.to_string(),
        },
    };

    let mut keywords: Vec<&str> = Vec::new();
    for token in raw.split_whitespace() {
        if token.chars().count() < MIN_KEYWORD_LEN {
            continue;
        }
        if !keywords.contains(&token) {
            keywords.push(token);
        }
    }

    let rewritten = keywords.join(" ");
    if rewritten.chars().count() < MIN_KEYWORD_LEN {
        tracing::debug!("Rewrite produced too little, keeping original query");
        query.to_string()
    } else {
        tracing::debug!("Rewrote query '{}' -> '{}'", query, rewritten);
        rewritten
    }
}

/// Pull keywords out of a reasoning trace: text after the last "keywords:"
/// marker, or the final sentence
fn keywords_from_reasoning(lowered: &str) -> String {
    if let Some(pos) = lowered.rfind("keywords:") {
        return lowered[pos + "keywords:".len()..].to_string();
    }

    lowered
        .rsplit(['.', '\n'])
        .find(|s| !s.trim().is_empty())
        .unwrap_or(lowered)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{QuarryError, Result};
    use crate::llm::Generation;
    use async_trait::async_trait;

    struct Scripted {
        response: Option<String>,
        reasoning: Option<String>,
        fail: bool,
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _options: GenerateOptions,
        ) -> Result<Generation> {
            if self.fail {
                return Err(QuarryError::Generation("down".to_string()));
            }
            Ok(Generation {
                response: self.response.clone(),
                reasoning: self.reasoning.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_keywords_lowercased_and_deduplicated() {
        let gen = Scripted {
            response: Some("Kant Ethics KANT categorical".to_string()),
            reasoning: None,
            fail: false,
        };

        let rewritten = rewrite_query(&gen, "m", &[], "what did Kant say?", 0.2).await;
        assert_eq!(rewritten, "kant ethics categorical");
    }

    #[tokio::test]
    async fn test_short_tokens_dropped() {
        let gen = Scripted {
            response: Some("ai ml ethics of it".to_string()),
            reasoning: None,
            fail: false,
        };

        let rewritten = rewrite_query(&gen, "m", &[], "ethics question", 0.2).await;
        assert_eq!(rewritten, "ethics");
    }

    #[tokio::test]
    async fn test_empty_output_falls_back_to_original() {
        let gen = Scripted {
            response: Some("  ".to_string()),
            reasoning: None,
            fail: false,
        };

        let rewritten = rewrite_query(&gen, "m", &[], "original question", 0.2).await;
        assert_eq!(rewritten, "original question");
    }

    #[tokio::test]
    async fn test_reasoning_keywords_marker() {
        let gen = Scripted {
            response: None,
            reasoning: Some(
                "The user wants to search. Keywords: kant duty imperative".to_string(),
            ),
            fail: false,
        };

        let rewritten = rewrite_query(&gen, "m", &[], "question", 0.2).await;
        assert_eq!(rewritten, "kant duty imperative");
    }

    #[tokio::test]
    async fn test_reasoning_final_sentence_fallback() {
        let gen = Scripted {
            response: None,
            reasoning: Some("Let me think about this. kant moral philosophy".to_string()),
            fail: false,
        };

        let rewritten = rewrite_query(&gen, "m", &[], "question", 0.2).await;
        assert_eq!(rewritten, "kant moral philosophy");
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back() {
        let gen = Scripted {
            response: None,
            reasoning: None,
            fail: true,
        };

        let rewritten = rewrite_query(&gen, "m", &[], "keep me", 0.2).await;
        assert_eq!(rewritten, "keep me");
    }

    #[tokio::test]
    async fn test_too_short_rewrite_falls_back() {
        let gen = Scripted {
            response: Some("a b c".to_string()),
            reasoning: None,
            fail: false,
        };

        let rewritten = rewrite_query(&gen, "m", &[], "long original query", 0.2).await;
        assert_eq!(rewritten, "long original query");
    }
}
