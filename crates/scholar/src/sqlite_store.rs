//! SQLite-backed implementations of the core storage traits.
//!
//! One pool serves all three stores. [`SqliteVectorIndex`] persists
//! vectors as little-endian f32 BLOBs and scores them in process, like
//! the in-memory backend but over a `chunk_vectors` table.
//! [`SqliteGraphStore`] keeps entities, relationships, and chunk
//! mentions; BFS expansion runs one frontier query per visited node.
//! [`SqliteLedger`] stores document records with the ingestion state
//! serialized as JSON.
//!
//! Backend failures map onto the taxonomy the callers act on:
//! vector-store errors are fatal, graph errors surface as
//! `GraphUnavailable` so retrieval can degrade.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use scholar_core::error::{RagError, Result};
use scholar_core::graph::{GraphCounts, GraphStore, Neighbor};
use scholar_core::index::{blob_to_vec, vec_to_blob, Metric, VectorHit, VectorIndex};
use scholar_core::ledger::DocumentLedger;
use scholar_core::models::{Chunk, Document, Entity, IngestState, Relationship};

fn vector_err(e: sqlx::Error) -> RagError {
    RagError::VectorStoreUnavailable(e.to_string())
}

fn graph_err(e: sqlx::Error) -> RagError {
    RagError::GraphUnavailable(e.to_string())
}

fn internal_err(e: sqlx::Error) -> RagError {
    RagError::Internal(anyhow::Error::new(e))
}

// ============ Vector index ============

#[derive(Debug)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
    metric: Metric,
}

impl SqliteVectorIndex {
    /// Bind to the pool and pin the similarity metric. A database
    /// created under a different metric is rejected here rather than
    /// silently re-scored.
    pub async fn open(pool: SqlitePool, metric: Metric) -> Result<Self> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'metric'")
                .fetch_optional(&pool)
                .await
                .map_err(vector_err)?;
        let name = match metric {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
        };
        match stored {
            Some(existing) if existing != name => {
                return Err(RagError::invalid_config(format!(
                    "index was built with metric '{existing}', configured metric is '{name}'"
                )));
            }
            Some(_) => {}
            None => {
                sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES ('metric', ?)")
                    .bind(name)
                    .execute(&pool)
                    .await
                    .map_err(vector_err)?;
            }
        }
        Ok(Self { pool, metric })
    }

    async fn pinned_dims(&self) -> Result<Option<usize>> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
                .fetch_optional(&self.pool)
                .await
                .map_err(vector_err)?;
        Ok(stored.and_then(|s| s.parse().ok()))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(RagError::invalid_config("cannot index an empty vector"));
        }
        match self.pinned_dims().await? {
            Some(d) if d != vector.len() => {
                return Err(RagError::invalid_config(format!(
                    "vector has {} dimensions but the index is pinned to {d}",
                    vector.len()
                )));
            }
            Some(_) => {}
            None => {
                sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES ('dims', ?)")
                    .bind(vector.len().to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(vector_err)?;
            }
        }

        let mut tx = self.pool.begin().await.map_err(vector_err)?;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, text, hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                chunk_index = excluded.chunk_index,
                text = excluded.text,
                hash = excluded.hash
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await
        .map_err(vector_err)?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await
        .map_err(vector_err)?;

        tx.commit().await.map_err(vector_err)?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        if top_k == 0 {
            return Err(RagError::invalid_config("top_k must be at least 1"));
        }
        if let Some(d) = self.pinned_dims().await? {
            if d != vector.len() {
                return Err(RagError::invalid_config(format!(
                    "query vector has {} dimensions but the index is pinned to {d}",
                    vector.len()
                )));
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding, c.chunk_index, c.text
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            ORDER BY c.rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(vector_err)?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                VectorHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: self.metric.score(vector, &stored),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(vector_err)?;
        let result = sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(vector_err)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(vector_err)?;
        tx.commit().await.map_err(vector_err)?;
        Ok(result.rows_affected())
    }

    async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(vector_err)?;
        Ok(count as u64)
    }
}

// ============ Graph store ============

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Undirected edge list for one node, outgoing first, each side in
    /// insertion order.
    async fn edges_of(&self, entity_id: &str) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        let outgoing = sqlx::query(
            "SELECT target_id, rel_type FROM relationships WHERE source_id = ? ORDER BY rowid",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(graph_err)?;
        for row in &outgoing {
            out.push((row.get("target_id"), row.get("rel_type")));
        }
        let incoming = sqlx::query(
            "SELECT source_id, rel_type FROM relationships WHERE target_id = ? ORDER BY rowid",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(graph_err)?;
        for row in &incoming {
            out.push((row.get("source_id"), row.get("rel_type")));
        }
        Ok(out)
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT label, kind FROM entities WHERE id = ?")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(graph_err)?;
        Ok(row.map(|r| Entity {
            label: r.get("label"),
            kind: r.get("kind"),
        }))
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_entity(&self, entity: &Entity) -> Result<String> {
        let id = entity.stable_id();
        sqlx::query("INSERT OR IGNORE INTO entities (id, label, kind) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(&entity.label)
            .bind(&entity.kind)
            .execute(&self.pool)
            .await
            .map_err(graph_err)?;
        Ok(id)
    }

    async fn upsert_relationship(&self, rel: &Relationship) -> Result<()> {
        let source_id = self.upsert_entity(&rel.source).await?;
        let target_id = self.upsert_entity(&rel.target).await?;
        sqlx::query(
            r#"
            INSERT INTO relationships (source_id, target_id, rel_type, weight,
                                       observations, document_id, chunk_id)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(source_id, target_id, rel_type) DO UPDATE SET
                observations = observations + 1
            "#,
        )
        .bind(&source_id)
        .bind(&target_id)
        .bind(&rel.rel_type)
        .bind(rel.weight as f64)
        .bind(&rel.provenance.document_id)
        .bind(&rel.provenance.chunk_id)
        .execute(&self.pool)
        .await
        .map_err(graph_err)?;
        Ok(())
    }

    async fn record_mention(&self, entity_id: &str, chunk_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO mentions (entity_id, chunk_id, seq)
            VALUES (?, ?, (SELECT COUNT(*) FROM mentions WHERE chunk_id = ?))
            "#,
        )
        .bind(entity_id)
        .bind(chunk_id)
        .bind(chunk_id)
        .execute(&self.pool)
        .await
        .map_err(graph_err)?;
        Ok(())
    }

    async fn entities_in_chunks(&self, chunk_ids: &[String]) -> Result<Vec<(String, Entity)>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for chunk_id in chunk_ids {
            let rows = sqlx::query(
                r#"
                SELECT m.entity_id, e.label, e.kind
                FROM mentions m JOIN entities e ON e.id = m.entity_id
                WHERE m.chunk_id = ?
                ORDER BY m.seq
                "#,
            )
            .bind(chunk_id)
            .fetch_all(&self.pool)
            .await
            .map_err(graph_err)?;
            for row in &rows {
                let id: String = row.get("entity_id");
                if seen.insert(id.clone()) {
                    out.push((
                        id,
                        Entity {
                            label: row.get("label"),
                            kind: row.get("kind"),
                        },
                    ));
                }
            }
        }
        Ok(out)
    }

    async fn neighbors(&self, entity_id: &str, max_hops: usize) -> Result<Vec<Neighbor>> {
        let mut out = Vec::new();
        if max_hops == 0 || self.get_entity(entity_id).await?.is_none() {
            return Ok(out);
        }
        let mut visited = std::collections::HashSet::new();
        visited.insert(entity_id.to_string());
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((entity_id.to_string(), 0usize));
        while let Some((current, hops)) = queue.pop_front() {
            if hops >= max_hops {
                continue;
            }
            for (next_id, rel_type) in self.edges_of(&current).await? {
                if !visited.insert(next_id.clone()) {
                    continue;
                }
                if let Some(entity) = self.get_entity(&next_id).await? {
                    out.push(Neighbor {
                        entity_id: next_id.clone(),
                        entity,
                        hops: hops + 1,
                        rel_type,
                    });
                }
                queue.push_back((next_id, hops + 1));
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
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT observations FROM relationships WHERE source_id = ? AND target_id = ? AND rel_type = ?",
        )
        .bind(source_id)
        .bind(target_id)
        .bind(rel_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(graph_err)?;
        Ok(row.map(|n| n as u64))
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await
            .map_err(graph_err)?;
        let relationships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
            .fetch_one(&self.pool)
            .await
            .map_err(graph_err)?;
        Ok(GraphCounts {
            entities: entities as u64,
            relationships: relationships as u64,
        })
    }
}

// ============ Document ledger ============

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let state_json: String = row.get("state_json");
    let metadata_json: String = row.get("metadata_json");
    let state: IngestState = serde_json::from_str(&state_json)
        .map_err(|e| RagError::Internal(anyhow::Error::new(e)))?;
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    Ok(Document {
        id: row.get("id"),
        source: row.get("source"),
        title: row.get("title"),
        metadata,
        state,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        chunk_count: row.get("chunk_count"),
    })
}

#[async_trait]
impl DocumentLedger for SqliteLedger {
    async fn upsert(&self, document: &Document) -> Result<()> {
        let state_json = serde_json::to_string(&document.state)
            .map_err(|e| RagError::Internal(anyhow::Error::new(e)))?;
        let metadata_json = serde_json::to_string(&document.metadata)
            .map_err(|e| RagError::Internal(anyhow::Error::new(e)))?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, source, title, metadata_json, state_json,
                                   created_at, updated_at, chunk_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                title = excluded.title,
                metadata_json = excluded.metadata_json,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at,
                chunk_count = excluded.chunk_count
            "#,
        )
        .bind(&document.id)
        .bind(&document.source)
        .bind(&document.title)
        .bind(&metadata_json)
        .bind(&state_json)
        .bind(document.created_at)
        .bind(document.updated_at)
        .bind(document.chunk_count)
        .execute(&self.pool)
        .await
        .map_err(internal_err)?;
        Ok(())
    }

    async fn get(&self, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn set_state(&self, document_id: &str, state: IngestState) -> Result<()> {
        let state_json = serde_json::to_string(&state)
            .map_err(|e| RagError::Internal(anyhow::Error::new(e)))?;
        sqlx::query("UPDATE documents SET state_json = ?, updated_at = ? WHERE id = ?")
            .bind(&state_json)
            .bind(chrono::Utc::now().timestamp())
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(internal_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(internal_err)?;
        rows.iter().map(row_to_document).collect()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(internal_err)?;
        Ok(count as u64)
    }
}
