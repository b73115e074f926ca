//! Vector index: chunk embeddings with similarity search.
//!
//! The [`VectorIndex`] trait is the seam between the pipeline and any
//! concrete store. [`InMemoryVectorIndex`] backs tests and small runs;
//! the application crate provides a SQLite-backed implementation.
//!
//! Dimensionality and the similarity metric are pinned when the first
//! vector lands. Every later upsert and query must match or the call
//! fails with `InvalidConfiguration`: mixing embedding models in one
//! index silently poisons every ranking.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Similarity metric used for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Dot,
}

impl Metric {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "dot" => Ok(Metric::Dot),
            other => Err(RagError::invalid_config(format!(
                "unknown similarity metric '{other}' (expected 'cosine' or 'dot')"
            ))),
        }
    }

    pub fn score(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::Dot => dot_product(a, b),
        }
    }
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Cosine
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
}

/// Chunk vector storage and similarity search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for a chunk. Replaces by chunk id.
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()>;

    /// Top-k most similar chunks, descending score. Ties break by
    /// insertion order so repeated queries stay stable.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    /// Drop every vector belonging to a document.
    async fn delete_document(&self, document_id: &str) -> Result<u64>;

    async fn len(&self) -> Result<u64>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

/// Little-endian f32 packing for BLOB storage.
pub fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn check_dims(pinned: &mut Option<usize>, got: usize, what: &str) -> Result<()> {
    match pinned {
        Some(d) if *d != got => Err(RagError::invalid_config(format!(
            "{what} has {got} dimensions but the index is pinned to {d}"
        ))),
        Some(_) => Ok(()),
        None => {
            *pinned = Some(got);
            Ok(())
        }
    }
}

struct Row {
    chunk_id: String,
    document_id: String,
    chunk_index: i64,
    text: String,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    dims: Option<usize>,
    rows: Vec<Row>,
}

/// In-memory index for tests and small corpora.
pub struct InMemoryVectorIndex {
    metric: Metric,
    inner: RwLock<Inner>,
}

impl InMemoryVectorIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new(Metric::Cosine)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(RagError::invalid_config("cannot index an empty vector"));
        }
        let mut inner = self.lock_write();
        check_dims(&mut inner.dims, vector.len(), "vector")?;
        let row = Row {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            vector: vector.to_vec(),
        };
        if let Some(existing) = inner.rows.iter_mut().find(|r| r.chunk_id == chunk.id) {
            *existing = row;
        } else {
            inner.rows.push(row);
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        if top_k == 0 {
            return Err(RagError::invalid_config("top_k must be at least 1"));
        }
        let inner = self.lock_read();
        if let Some(d) = inner.dims {
            if d != vector.len() {
                return Err(RagError::invalid_config(format!(
                    "query vector has {} dimensions but the index is pinned to {d}",
                    vector.len()
                )));
            }
        }
        let mut hits: Vec<VectorHit> = inner
            .rows
            .iter()
            .map(|r| VectorHit {
                chunk_id: r.chunk_id.clone(),
                document_id: r.document_id.clone(),
                chunk_index: r.chunk_index,
                text: r.text.clone(),
                score: self.metric.score(vector, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: &str) -> Result<u64> {
        let mut inner = self.lock_write();
        let before = inner.rows.len();
        inner.rows.retain(|r| r.document_id != document_id);
        Ok((before - inner.rows.len()) as u64)
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.lock_read().rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chunk_id;

    fn chunk(doc: &str, idx: i64, text: &str) -> Chunk {
        Chunk {
            id: chunk_id(doc, idx),
            document_id: doc.to_string(),
            chunk_index: idx,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let index = InMemoryVectorIndex::default();
        index.upsert(&chunk("docaaaaaaaaaaaaa", 0, "x axis"), &[1.0, 0.0]).await.unwrap();
        index.upsert(&chunk("docaaaaaaaaaaaaa", 1, "y axis"), &[0.0, 1.0]).await.unwrap();
        index.upsert(&chunk("docaaaaaaaaaaaaa", 2, "diagonal"), &[0.7, 0.7]).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "x axis");
        assert_eq!(hits[1].text, "diagonal");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = InMemoryVectorIndex::default();
        index.upsert(&chunk("docaaaaaaaaaaaaa", 0, "a"), &[1.0, 0.0, 0.0]).await.unwrap();
        let err = index
            .upsert(&chunk("docaaaaaaaaaaaaa", 1, "b"), &[1.0, 0.0])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidConfiguration(_)));

        let err = index.query(&[1.0], 3).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_chunk_id() {
        let index = InMemoryVectorIndex::default();
        let c = chunk("docaaaaaaaaaaaaa", 0, "first");
        index.upsert(&c, &[1.0, 0.0]).await.unwrap();
        let mut c2 = c.clone();
        c2.text = "second".to_string();
        index.upsert(&c2, &[0.0, 1.0]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        let hits = index.query(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].text, "second");
    }

    #[tokio::test]
    async fn test_zero_top_k_rejected() {
        let index = InMemoryVectorIndex::default();
        let err = index.query(&[1.0], 0).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_delete_document_removes_all_chunks() {
        let index = InMemoryVectorIndex::default();
        index.upsert(&chunk("docaaaaaaaaaaaaa", 0, "a"), &[1.0]).await.unwrap();
        index.upsert(&chunk("docaaaaaaaaaaaaa", 1, "b"), &[0.5]).await.unwrap();
        index.upsert(&chunk("docbbbbbbbbbbbbb", 0, "c"), &[0.2]).await.unwrap();
        let removed = index.delete_document("docaaaaaaaaaaaaa").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = InMemoryVectorIndex::new(Metric::Dot);
        index.upsert(&chunk("docaaaaaaaaaaaaa", 0, "first"), &[1.0, 0.0]).await.unwrap();
        index.upsert(&chunk("docaaaaaaaaaaaaa", 1, "second"), &[0.0, 1.0]).await.unwrap();
        let hits = index.query(&[1.0, 1.0], 2).await.unwrap();
        assert_eq!(hits[0].text, "first");
        assert_eq!(hits[1].text, "second");
    }

    #[test]
    fn test_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
