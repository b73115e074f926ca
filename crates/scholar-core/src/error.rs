//! Error taxonomy for the retrieval pipeline.
//!
//! Every failure a caller can observe falls into one of these classes,
//! and the class decides the propagation policy:
//!
//! | Variant | Policy |
//! |---------|--------|
//! | [`RagError::InvalidConfiguration`] | caller error, never retried |
//! | [`RagError::EmbeddingUnavailable`] | fatal to the request after retries |
//! | [`RagError::GenerationUnavailable`] | fatal to the request after retries |
//! | [`RagError::GraphUnavailable`] | degrade to vector-only, log, continue |
//! | [`RagError::VectorStoreUnavailable`] | fatal, no viable fallback |
//! | [`RagError::ExtractionFailed`] | treated as zero entities found |

/// Result type used throughout the core and application crates.
pub type Result<T, E = RagError> = std::result::Result<T, E>;

/// Failure classes for ingestion, retrieval, and generation.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Invalid caller-supplied configuration (e.g. `overlap >= max_chars`).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The embedding backend could not be reached after bounded retries.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The LLM backend could not be reached after bounded retries.
    #[error("generation backend unavailable: {0}")]
    GenerationUnavailable(String),

    /// The knowledge graph store could not be reached. Retrieval catches
    /// this and returns vector-only results with a degraded flag.
    #[error("graph store unavailable: {0}")]
    GraphUnavailable(String),

    /// The vector store could not be reached.
    #[error("vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    /// Entity extraction failed for a chunk. Ingestion continues with
    /// zero entities for that chunk.
    #[error("entity extraction failed: {0}")]
    ExtractionFailed(String),

    /// Wrapped backend error that fits no class above.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RagError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// True for failures the pipeline absorbs instead of surfacing.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::GraphUnavailable(_) | Self::ExtractionFailed(_)
        )
    }
}
