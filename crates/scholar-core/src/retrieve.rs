//! Hybrid retrieval: vector similarity plus graph entity expansion.
//!
//! The caller embeds the question and hands over the vector; this
//! module stays free of any provider concern. Vector search is the
//! load-bearing half: if it fails the retrieval fails. The graph half
//! degrades gracefully, a `GraphUnavailable` error produces an empty
//! entity list and sets `graph_degraded` instead of failing the query.

use std::collections::HashMap;

use crate::error::{RagError, Result};
use crate::graph::GraphStore;
use crate::index::{VectorHit, VectorIndex};
use crate::models::RelatedEntity;

/// Knobs for one retrieval pass.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// How many chunks vector search returns.
    pub top_k: usize,
    /// Skip graph expansion entirely when false.
    pub include_entities: bool,
    /// BFS depth for neighbor expansion.
    pub max_hops: usize,
    /// Cap on the related-entity list, nearest kept.
    pub max_related_entities: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            include_entities: true,
            max_hops: 1,
            max_related_entities: 10,
        }
    }
}

/// Output of one retrieval pass.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub hits: Vec<VectorHit>,
    /// Seeds first (hop 0), then neighbors by ascending hop count.
    pub entities: Vec<RelatedEntity>,
    pub graph_degraded: bool,
}

/// Run hybrid retrieval for an already-embedded query.
pub async fn retrieve(
    index: &dyn VectorIndex,
    graph: &dyn GraphStore,
    query_vector: &[f32],
    params: &RetrievalParams,
) -> Result<Retrieval> {
    let hits = index.query(query_vector, params.top_k).await?;

    if !params.include_entities || hits.is_empty() {
        return Ok(Retrieval {
            hits,
            entities: Vec::new(),
            graph_degraded: false,
        });
    }

    match expand_entities(graph, &hits, params).await {
        Ok(entities) => Ok(Retrieval {
            hits,
            entities,
            graph_degraded: false,
        }),
        Err(RagError::GraphUnavailable(reason)) => {
            tracing::warn!(%reason, "graph unavailable, answering from vector hits only");
            Ok(Retrieval {
                hits,
                entities: Vec::new(),
                graph_degraded: true,
            })
        }
        Err(e) => Err(e),
    }
}

/// Seed entities from the hit chunks, then BFS outward. An entity
/// reachable along several paths keeps its smallest hop count.
async fn expand_entities(
    graph: &dyn GraphStore,
    hits: &[VectorHit],
    params: &RetrievalParams,
) -> Result<Vec<RelatedEntity>> {
    let chunk_ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
    let seeds = graph.entities_in_chunks(&chunk_ids).await?;

    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut entities: Vec<RelatedEntity> = Vec::new();
    for (id, entity) in &seeds {
        if by_id.contains_key(id) {
            continue;
        }
        by_id.insert(id.clone(), entities.len());
        entities.push(RelatedEntity {
            entity: entity.clone(),
            hops: 0,
            relation: None,
        });
    }

    if params.max_hops > 0 {
        for (seed_id, _) in &seeds {
            for neighbor in graph.neighbors(seed_id, params.max_hops).await? {
                match by_id.get(&neighbor.entity_id) {
                    Some(&pos) if entities[pos].hops <= neighbor.hops => {}
                    Some(&pos) => {
                        entities[pos].hops = neighbor.hops;
                        entities[pos].relation = Some(neighbor.rel_type);
                    }
                    None => {
                        by_id.insert(neighbor.entity_id.clone(), entities.len());
                        entities.push(RelatedEntity {
                            entity: neighbor.entity,
                            hops: neighbor.hops,
                            relation: Some(neighbor.rel_type),
                        });
                    }
                }
            }
        }
    }

    entities.sort_by_key(|e| e.hops);
    entities.truncate(params.max_related_entities);
    Ok(entities)
}
