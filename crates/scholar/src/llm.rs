//! Answer generation providers.
//!
//! The [`Generator`] trait takes a fully composed prompt and returns
//! the answer text. Two providers:
//!
//! - **[`ExtractiveGenerator`]**: offline; pulls the sentences from the
//!   prompt's context section that best overlap the question. The
//!   default, and the provider integration tests run against.
//! - **[`GeminiGenerator`]**: Google `generateContent` endpoint with
//!   bounded retry. Requires `GEMINI_API_KEY`.
//!
//! Generation failure is fatal to the request: exhausted retries
//! surface as [`RagError::GenerationUnavailable`]. There is no silent
//! fallback from one provider to another.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use scholar_core::error::{RagError, Result};

use crate::config::GenerationConfig;
use crate::retry::backoff_delay;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// An answer-text backend.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Build the configured provider.
pub fn create_generator(config: &GenerationConfig) -> Result<std::sync::Arc<dyn Generator>> {
    match config.provider.as_str() {
        "extractive" => Ok(std::sync::Arc::new(ExtractiveGenerator)),
        "gemini" => Ok(std::sync::Arc::new(GeminiGenerator::new(config)?)),
        other => Err(RagError::invalid_config(format!(
            "unknown generation provider '{other}'"
        ))),
    }
}

// ============ Gemini provider ============

/// Google Gemini `generateContent` API.
pub struct GeminiGenerator {
    client: reqwest::Client,
    model: String,
    max_retries: u32,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        if std::env::var("GEMINI_API_KEY").is_err() {
            return Err(RagError::invalid_config(
                "GEMINI_API_KEY environment variable not set",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::GenerationUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    json.get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            RagError::GenerationUnavailable("invalid response: missing candidate text".to_string())
        })
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| RagError::GenerationUnavailable("GEMINI_API_KEY not set".to_string()))?;
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            tokio::time::sleep(backoff_delay(attempt, RETRY_BASE_DELAY)).await;

            let resp = self
                .client
                .post(&url)
                .header("X-goog-api-key", &api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| RagError::GenerationUnavailable(e.to_string()))?;
                        return parse_gemini_response(&json);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("generation API error {status}: {text}"));
                        continue;
                    }
                    return Err(RagError::GenerationUnavailable(format!(
                        "generation API error {status}: {text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }
        Err(RagError::GenerationUnavailable(
            last_err.unwrap_or_else(|| "generation failed after retries".to_string()),
        ))
    }
}

// ============ Extractive provider ============

const NO_ANSWER: &str = "The indexed documents do not contain an answer to this question.";

/// Offline answerer: scores context sentences by word overlap with the
/// question and returns the best ones verbatim.
pub struct ExtractiveGenerator;

fn section<'a>(prompt: &'a str, header: &str) -> Option<&'a str> {
    let start = prompt.find(header)? + header.len();
    let rest = &prompt[start..];
    let end = rest
        .find("\nRELATED ENTITIES:")
        .or_else(|| rest.find("\nUSER QUESTION:"))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn question_of(prompt: &str) -> Option<&str> {
    let start = prompt.find("USER QUESTION:")? + "USER QUESTION:".len();
    let rest = &prompt[start..];
    Some(rest.split('\n').next().unwrap_or(rest).trim())
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let context = section(prompt, "CONTEXT FROM DOCUMENTS:").unwrap_or("");
        let question = question_of(prompt).unwrap_or("");
        let wanted = keywords(question);

        let mut scored: Vec<(usize, usize, &str)> = Vec::new();
        for (pos, raw) in context.split(['.', '!', '?']).enumerate() {
            let sentence = raw.trim();
            if sentence.is_empty() || sentence.starts_with("(no matching passages") {
                continue;
            }
            let overlap = keywords(sentence).intersection(&wanted).count();
            if overlap > 0 {
                scored.push((overlap, pos, sentence));
            }
        }
        if scored.is_empty() {
            return Ok(NO_ANSWER.to_string());
        }
        // Best overlap first, original order among equals.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let answer = scored
            .iter()
            .take(3)
            .map(|(_, _, s)| format!("{s}."))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gemini_response() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": " The answer.\n" }] }
            }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "The answer.");
        assert!(parse_gemini_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_extractive_picks_overlapping_sentences() {
        let prompt = "instructions\n\nCONTEXT FROM DOCUMENTS:\n\
            [doc1] Radium was discovered by Marie Curie. Paris is in France.\n\n\
            USER QUESTION: who discovered radium?\n\nRESPONSE:";
        let answer = ExtractiveGenerator.generate(prompt).await.unwrap();
        assert!(answer.contains("Marie Curie"));
        assert!(!answer.contains("Paris"));
    }

    #[tokio::test]
    async fn test_extractive_reports_no_answer() {
        let prompt = "instructions\n\nCONTEXT FROM DOCUMENTS:\n\
            [doc1] Nothing relevant at all.\n\n\
            USER QUESTION: zzyzx?\n\nRESPONSE:";
        let answer = ExtractiveGenerator.generate(prompt).await.unwrap();
        assert_eq!(answer, NO_ANSWER);
    }
}
