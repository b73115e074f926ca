//! Entity extraction from chunk text.
//!
//! Defines the [`EntityExtractor`] trait plus the dependency-free
//! [`HeuristicExtractor`]: capitalized spans and quoted phrases,
//! stop-word filtered. Model-backed extractors live in the application
//! crate and implement the same trait.
//!
//! Extraction is best-effort: an empty result is not an error. All
//! extractors must emit normalized-comparable labels (see
//! [`Entity::normalized_key`](crate::models::Entity::normalized_key))
//! so the graph store can deduplicate across chunks and documents.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::models::{Chunk, Entity, Provenance, Relationship};

/// Relationship type emitted for entities observed in the same chunk.
pub const REL_CO_OCCURS: &str = "CO_OCCURS_WITH";

/// Entities and relationships found in one chunk.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

/// Extracts named entities and relationships from a chunk.
///
/// Implementations may be model-backed and non-deterministic, but must
/// still produce labels that normalize consistently.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, chunk: &Chunk) -> Result<Extraction>;
}

fn capitalized_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][A-Za-z0-9]+(?:\s+[A-Z][A-Za-z0-9]+)*\b").unwrap()
    })
}

fn quoted_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)""#).unwrap())
}

/// Sentence-initial and question words that capitalization alone would
/// misclassify as entities.
fn stop_words() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "the", "this", "that", "these", "those", "a", "an", "it", "its",
            "what", "how", "why", "where", "when", "who", "which", "is",
            "are", "was", "were", "and", "or", "but", "if", "then", "there",
            "here", "also", "however",
        ]
        .into_iter()
        .collect()
    })
}

/// Rule-based extractor: capitalized word spans and quoted phrases.
///
/// Every entity is typed `CONCEPT`: without a model there is no
/// reliable signal for finer kinds, and a wrong kind would split the
/// graph's dedup key.
#[derive(Debug, Default, Clone)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    fn candidate_labels(text: &str) -> Vec<String> {
        let mut labels = Vec::new();
        for m in capitalized_span_re().find_iter(text) {
            labels.push(m.as_str().to_string());
        }
        for cap in quoted_phrase_re().captures_iter(text) {
            labels.push(cap[1].to_string());
        }
        labels
    }
}

#[async_trait]
impl EntityExtractor for HeuristicExtractor {
    async fn extract(&self, chunk: &Chunk) -> Result<Extraction> {
        let mut entities = Vec::new();
        let mut seen = HashSet::new();
        for label in Self::candidate_labels(&chunk.text) {
            let trimmed = label.trim();
            if trimmed.is_empty() || stop_words().contains(trimmed.to_lowercase().as_str()) {
                continue;
            }
            let entity = Entity::new(trimmed, "CONCEPT");
            if seen.insert(entity.normalized_key()) {
                entities.push(entity);
            }
        }
        let relationships = co_occurrence_edges(&entities, chunk);
        Ok(Extraction {
            entities,
            relationships,
        })
    }
}

/// Link consecutive entities observed in the same chunk with a
/// `CO_OCCURS_WITH` edge. Consecutive-only keeps the edge count linear
/// in the entity count.
pub fn co_occurrence_edges(entities: &[Entity], chunk: &Chunk) -> Vec<Relationship> {
    entities
        .windows(2)
        .map(|pair| Relationship {
            source: pair[0].clone(),
            target: pair[1].clone(),
            rel_type: REL_CO_OCCURS.to_string(),
            provenance: Provenance {
                document_id: chunk.document_id.clone(),
                chunk_id: chunk.id.clone(),
            },
            weight: 1.0,
        })
        .collect()
}
