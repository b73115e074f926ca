//! Knowledge graph store: entities, relationships, chunk mentions.
//!
//! Entities dedupe by their [`stable_id`](crate::models::Entity::stable_id),
//! so "Neo4j" in two documents lands on one node. Relationships are
//! keyed by (source, target, type); re-observing one bumps its
//! observation counter instead of inserting a duplicate edge.
//! Traversal treats edges as undirected.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{Entity, Relationship};

/// An entity reached while expanding the graph from a seed.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub entity_id: String,
    pub entity: Entity,
    /// Edge count from the nearest seed.
    pub hops: usize,
    /// Type of the edge this entity was reached through.
    pub rel_type: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub entities: u64,
    pub relationships: u64,
}

/// Graph persistence and traversal.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert the entity if its stable id is new. Returns the stable id
    /// either way.
    async fn upsert_entity(&self, entity: &Entity) -> Result<String>;

    /// Insert or re-observe a relationship. Both endpoints are upserted
    /// first, so callers can hand over extractor output directly.
    async fn upsert_relationship(&self, rel: &Relationship) -> Result<()>;

    /// Record that an entity appears in a chunk.
    async fn record_mention(&self, entity_id: &str, chunk_id: &str) -> Result<()>;

    /// Entities mentioned in any of the given chunks, in chunk order,
    /// deduplicated.
    async fn entities_in_chunks(&self, chunk_ids: &[String]) -> Result<Vec<(String, Entity)>>;

    /// Breadth-first expansion from a seed entity, up to `max_hops`
    /// edges out, nearest first. The seed itself is not returned.
    async fn neighbors(&self, entity_id: &str, max_hops: usize) -> Result<Vec<Neighbor>>;

    /// Observation count for an edge, if it exists.
    async fn relationship_observations(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
    ) -> Result<Option<u64>>;

    async fn counts(&self) -> Result<GraphCounts>;
}

#[derive(Default)]
struct Inner {
    entities: HashMap<String, Entity>,
    /// Observation count, keyed by (source_id, target_id, rel_type).
    edges: HashMap<(String, String, String), u64>,
    /// entity_id -> connected entity ids, in discovery order.
    adjacency: HashMap<String, Vec<(String, String)>>,
    /// chunk_id -> entity ids mentioned, in recording order.
    mentions: HashMap<String, Vec<String>>,
}

/// In-memory graph for tests and small corpora.
#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn link(inner: &mut Inner, a: &str, b: &str, rel_type: &str) {
    let list = inner.adjacency.entry(a.to_string()).or_default();
    if !list.iter().any(|(id, _)| id == b) {
        list.push((b.to_string(), rel_type.to_string()));
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_entity(&self, entity: &Entity) -> Result<String> {
        let id = entity.stable_id();
        let mut inner = self.lock_write();
        inner.entities.entry(id.clone()).or_insert_with(|| entity.clone());
        Ok(id)
    }

    async fn upsert_relationship(&self, rel: &Relationship) -> Result<()> {
        let source_id = rel.source.stable_id();
        let target_id = rel.target.stable_id();
        let mut inner = self.lock_write();
        inner
            .entities
            .entry(source_id.clone())
            .or_insert_with(|| rel.source.clone());
        inner
            .entities
            .entry(target_id.clone())
            .or_insert_with(|| rel.target.clone());
        let key = (source_id.clone(), target_id.clone(), rel.rel_type.clone());
        inner.edges.entry(key).and_modify(|n| *n += 1).or_insert(1);
        link(&mut inner, &source_id, &target_id, &rel.rel_type);
        link(&mut inner, &target_id, &source_id, &rel.rel_type);
        Ok(())
    }

    async fn record_mention(&self, entity_id: &str, chunk_id: &str) -> Result<()> {
        let mut inner = self.lock_write();
        if !inner.entities.contains_key(entity_id) {
            return Err(RagError::Internal(anyhow::anyhow!(
                "mention references unknown entity {entity_id}"
            )));
        }
        let list = inner.mentions.entry(chunk_id.to_string()).or_default();
        if !list.iter().any(|id| id == entity_id) {
            list.push(entity_id.to_string());
        }
        Ok(())
    }

    async fn entities_in_chunks(&self, chunk_ids: &[String]) -> Result<Vec<(String, Entity)>> {
        let inner = self.lock_read();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for chunk_id in chunk_ids {
            let Some(ids) = inner.mentions.get(chunk_id) else {
                continue;
            };
            for id in ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(entity) = inner.entities.get(id) {
                    out.push((id.clone(), entity.clone()));
                }
            }
        }
        Ok(out)
    }

    async fn neighbors(&self, entity_id: &str, max_hops: usize) -> Result<Vec<Neighbor>> {
        let inner = self.lock_read();
        let mut out = Vec::new();
        if max_hops == 0 || !inner.entities.contains_key(entity_id) {
            return Ok(out);
        }
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(entity_id.to_string());
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((entity_id.to_string(), 0));
        while let Some((current, hops)) = queue.pop_front() {
            if hops >= max_hops {
                continue;
            }
            let Some(links) = inner.adjacency.get(&current) else {
                continue;
            };
            for (next_id, rel_type) in links {
                if !visited.insert(next_id.clone()) {
                    continue;
                }
                if let Some(entity) = inner.entities.get(next_id) {
                    out.push(Neighbor {
                        entity_id: next_id.clone(),
                        entity: entity.clone(),
                        hops: hops + 1,
                        rel_type: rel_type.clone(),
                    });
                }
                queue.push_back((next_id.clone(), hops + 1));
            }
        }
        Ok(out)
    }

    async fn relationship_observations(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
    ) -> Result<Option<u64>> {
        let inner = self.lock_read();
        let key = (
            source_id.to_string(),
            target_id.to_string(),
            rel_type.to_string(),
        );
        Ok(inner.edges.get(&key).copied())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let inner = self.lock_read();
        Ok(GraphCounts {
            entities: inner.entities.len() as u64,
            relationships: inner.edges.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    fn rel(a: &str, b: &str) -> Relationship {
        Relationship {
            source: Entity::new(a, "CONCEPT"),
            target: Entity::new(b, "CONCEPT"),
            rel_type: "CO_OCCURS_WITH".to_string(),
            provenance: Provenance {
                document_id: "doc".to_string(),
                chunk_id: "doc:0".to_string(),
            },
            weight: 1.0,
        }
    }

    #[tokio::test]
    async fn test_entity_dedup_across_case_and_spacing() {
        let graph = InMemoryGraphStore::new();
        let a = graph.upsert_entity(&Entity::new("Marie Curie", "PERSON")).await.unwrap();
        let b = graph.upsert_entity(&Entity::new("marie  curie", "PERSON")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.counts().await.unwrap().entities, 1);
    }

    #[tokio::test]
    async fn test_reobserved_relationship_increments_counter() {
        let graph = InMemoryGraphStore::new();
        graph.upsert_relationship(&rel("A", "B")).await.unwrap();
        graph.upsert_relationship(&rel("A", "B")).await.unwrap();
        let source = Entity::new("A", "CONCEPT").stable_id();
        let target = Entity::new("B", "CONCEPT").stable_id();
        let obs = graph
            .relationship_observations(&source, &target, "CO_OCCURS_WITH")
            .await
            .unwrap();
        assert_eq!(obs, Some(2));
        assert_eq!(graph.counts().await.unwrap().relationships, 1);
    }

    #[tokio::test]
    async fn test_neighbors_bfs_hop_bounded() {
        let graph = InMemoryGraphStore::new();
        graph.upsert_relationship(&rel("A", "B")).await.unwrap();
        graph.upsert_relationship(&rel("B", "C")).await.unwrap();
        graph.upsert_relationship(&rel("C", "D")).await.unwrap();
        let a = Entity::new("A", "CONCEPT").stable_id();

        let one_hop = graph.neighbors(&a, 1).await.unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].entity.label, "B");

        let two_hops = graph.neighbors(&a, 2).await.unwrap();
        let labels: Vec<&str> = two_hops.iter().map(|n| n.entity.label.as_str()).collect();
        assert_eq!(labels, vec!["B", "C"]);
        assert_eq!(two_hops[1].hops, 2);
    }

    #[tokio::test]
    async fn test_neighbors_cycle_terminates() {
        let graph = InMemoryGraphStore::new();
        graph.upsert_relationship(&rel("A", "B")).await.unwrap();
        graph.upsert_relationship(&rel("B", "C")).await.unwrap();
        graph.upsert_relationship(&rel("C", "A")).await.unwrap();
        let a = Entity::new("A", "CONCEPT").stable_id();
        let out = graph.neighbors(&a, 10).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_neighbors_of_unknown_entity_is_empty() {
        let graph = InMemoryGraphStore::new();
        assert!(graph.neighbors("missing", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mentions_resolve_in_chunk_order() {
        let graph = InMemoryGraphStore::new();
        let a = graph.upsert_entity(&Entity::new("Alpha", "CONCEPT")).await.unwrap();
        let b = graph.upsert_entity(&Entity::new("Beta", "CONCEPT")).await.unwrap();
        graph.record_mention(&b, "doc:1").await.unwrap();
        graph.record_mention(&a, "doc:0").await.unwrap();
        graph.record_mention(&a, "doc:1").await.unwrap();

        let chunks = vec!["doc:0".to_string(), "doc:1".to_string()];
        let found = graph.entities_in_chunks(&chunks).await.unwrap();
        let labels: Vec<&str> = found.iter().map(|(_, e)| e.label.as_str()).collect();
        assert_eq!(labels, vec!["Alpha", "Beta"]);
    }

    #[tokio::test]
    async fn test_mention_of_unknown_entity_rejected() {
        let graph = InMemoryGraphStore::new();
        assert!(graph.record_mention("nope", "doc:0").await.is_err());
    }
}
