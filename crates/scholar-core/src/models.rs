//! Core data models used throughout Scholar.
//!
//! These types represent the documents, chunks, entities, and answers
//! that flow through the ingestion and retrieval pipeline. Identity is
//! content-derived wherever the pipeline relies on idempotence: a
//! document's id is the SHA-256 of its cleaned text, chunk ids are
//! derived from the document id and chunk index, and entity ids from
//! the normalized label and kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single scalar metadata value. Document metadata is an open string
/// map restricted to these kinds, validated at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Open scalar metadata attached to documents and entities.
pub type Metadata = BTreeMap<String, MetaValue>;

/// Stages of the per-document ingestion state machine, used to label
/// the terminal `Failed` state with where processing stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStage {
    Parse,
    Chunk,
    Embed,
    VectorIndex,
    ExtractEntities,
    GraphIndex,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IngestStage::Parse => "parse",
            IngestStage::Chunk => "chunk",
            IngestStage::Embed => "embed",
            IngestStage::VectorIndex => "vector-index",
            IngestStage::ExtractEntities => "extract-entities",
            IngestStage::GraphIndex => "graph-index",
        };
        f.write_str(s)
    }
}

/// Per-document ingestion state machine.
///
/// `Received → Parsed → Chunked → Embedded → VectorIndexed →
/// EntitiesExtracted → GraphIndexed → Complete`, with `Failed`
/// reachable from any non-terminal state. A graph-write failure after
/// the vector index committed yields `Complete { degraded: true }`;
/// vector search stays usable without graph enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestState {
    Received,
    Parsed,
    Chunked,
    Embedded,
    VectorIndexed,
    EntitiesExtracted,
    GraphIndexed,
    Complete { degraded: bool },
    Failed { stage: IngestStage, reason: String },
}

impl IngestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestState::Complete { .. } | IngestState::Failed { .. })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, IngestState::Complete { .. })
    }
}

/// An ingested document. `id` is the lowercase hex SHA-256 of the
/// cleaned text, so re-ingesting identical content maps to the same
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Originating path or URI.
    pub source: String,
    pub title: Option<String>,
    pub metadata: Metadata,
    pub state: IngestState,
    pub created_at: i64,
    pub updated_at: i64,
    pub chunk_count: i64,
}

/// Compute the content-hash identity for a document body.
pub fn document_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk of a document's body text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of the chunk text, shared across documents with
    /// identical chunk content.
    pub hash: String,
}

/// Deterministic chunk id, stable across re-ingestion of the same
/// content so vector-index upserts replace rather than duplicate.
pub fn chunk_id(document_id: &str, index: i64) -> String {
    let prefix: String = document_id.chars().take(12).collect();
    format!("{prefix}:{index}")
}

/// A named concept extracted from text. Globally unique by
/// [`Entity::normalized_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Display label as first observed.
    pub label: String,
    /// Uppercase kind, e.g. `PERSON`, `CONCEPT`, `TECHNOLOGY`.
    pub kind: String,
}

impl Entity {
    pub fn new(label: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: kind.into().to_uppercase(),
        }
    }

    /// Dedup key: casefolded, whitespace-collapsed label plus kind.
    pub fn normalized_key(&self) -> String {
        format!("{}/{}", self.kind.to_uppercase(), normalize_label(&self.label))
    }

    /// Deterministic entity id derived from the normalized key, so all
    /// backends agree on identity without coordination.
    pub fn stable_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_key().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest.chars().take(16).collect()
    }
}

/// Casefold and collapse internal whitespace so that extractor output
/// deduplicates cleanly in the graph store.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Where a relationship (or entity mention) was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub document_id: String,
    pub chunk_id: String,
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: Entity,
    pub target: Entity,
    /// Uppercase relationship type, e.g. `CO_OCCURS_WITH`.
    pub rel_type: String,
    pub provenance: Provenance,
    pub weight: f32,
}

/// A reference from an answer back to a chunk that grounded it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub chunk_id: String,
    pub chunk_index: i64,
    pub score: f64,
}

/// An entity surfaced by graph expansion during retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity: Entity,
    /// Hop distance from a seed entity; seeds themselves are hop 0.
    pub hops: usize,
    /// Type of the edge this entity was reached through, if any.
    pub relation: Option<String>,
}

/// The immutable result of a question. Carries ordered citations and
/// related entities; `graph_degraded` marks answers produced without
/// graph enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub related_entities: Vec<RelatedEntity>,
    pub graph_degraded: bool,
}
