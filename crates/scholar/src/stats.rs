//! System statistics: store counts and backend health.

use serde::Serialize;

use scholar_core::error::{RagError, Result};

use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub documents: u64,
    pub chunks: u64,
    pub entities: u64,
    pub relationships: u64,
    pub vector_store_ok: bool,
    pub graph_ok: bool,
    pub embedding_model: String,
    pub generation_model: String,
}

/// Collect counts, probing each backend. An unreachable store reports
/// unhealthy with zero counts instead of failing the whole call.
pub(crate) async fn collect(p: &Pipeline) -> Result<Stats> {
    let documents = p.ledger.count().await?;

    let (chunks, vector_store_ok) = match p.index.len().await {
        Ok(n) => (n, true),
        Err(RagError::VectorStoreUnavailable(_)) => (0, false),
        Err(e) => return Err(e),
    };

    let (entities, relationships, graph_ok) = match p.graph.counts().await {
        Ok(counts) => (counts.entities, counts.relationships, true),
        Err(RagError::GraphUnavailable(_)) => (0, 0, false),
        Err(e) => return Err(e),
    };

    Ok(Stats {
        documents,
        chunks,
        entities,
        relationships,
        vector_store_ok,
        graph_ok,
        embedding_model: p.gateway.model_name().to_string(),
        generation_model: p.generator.model_name().to_string(),
    })
}

fn health(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "unavailable"
    }
}

pub fn print_stats(stats: &Stats) {
    println!("Documents:       {}", stats.documents);
    println!("Chunks:          {}", stats.chunks);
    println!("Entities:        {}", stats.entities);
    println!("Relationships:   {}", stats.relationships);
    println!("Vector store:    {}", health(stats.vector_store_ok));
    println!("Knowledge graph: {}", health(stats.graph_ok));
    println!("Embedding model: {}", stats.embedding_model);
    println!("Generator:       {}", stats.generation_model);
}
