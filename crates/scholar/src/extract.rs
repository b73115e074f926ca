//! Model-backed entity extraction.
//!
//! [`LlmExtractor`] asks the generation provider for a JSON array of
//! entities found in a chunk. The model reply is treated as hostile
//! input: the parser takes the outermost `[...]` span and ignores any
//! prose around it, and a reply that still fails to parse yields an
//! empty extraction rather than an error. Provider outages surface as
//! `ExtractionFailed`, which ingestion downgrades to zero entities.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use scholar_core::error::{RagError, Result};
use scholar_core::extract::{co_occurrence_edges, EntityExtractor, Extraction};
use scholar_core::models::{Chunk, Entity};

use crate::llm::Generator;

const EXTRACTION_PROMPT: &str = "Extract the named entities from the following text. Respond \
with only a JSON array, no prose, where each element is an object with \"name\" (the entity as \
written) and \"type\" (one of PERSON, ORGANIZATION, LOCATION, TECHNOLOGY, CONCEPT, EVENT). \
Return [] if there are none.\n\nTEXT:\n";

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

pub struct LlmExtractor {
    generator: Arc<dyn Generator>,
}

impl LlmExtractor {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

/// Pull the outermost JSON array out of a model reply that may wrap it
/// in code fences or commentary.
fn parse_entity_json(reply: &str) -> Vec<RawEntity> {
    let Some(start) = reply.find('[') else {
        return Vec::new();
    };
    let Some(end) = reply.rfind(']') else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    serde_json::from_str(&reply[start..=end]).unwrap_or_default()
}

#[async_trait]
impl EntityExtractor for LlmExtractor {
    async fn extract(&self, chunk: &Chunk) -> Result<Extraction> {
        let prompt = format!("{EXTRACTION_PROMPT}{}", chunk.text);
        let reply = self
            .generator
            .generate(&prompt)
            .await
            .map_err(|e| RagError::ExtractionFailed(e.to_string()))?;

        let mut entities = Vec::new();
        let mut seen = HashSet::new();
        for raw in parse_entity_json(&reply) {
            let name = raw.name.trim();
            if name.is_empty() {
                continue;
            }
            let kind = if raw.kind.trim().is_empty() {
                "CONCEPT"
            } else {
                raw.kind.trim()
            };
            let entity = Entity::new(name, kind);
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
