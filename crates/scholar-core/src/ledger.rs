//! Document ledger: ingestion state and content-hash dedup.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Document, IngestState};

/// Tracks every document the pipeline has seen, keyed by the
/// content-derived document id. Lookup before ingestion is what makes
/// re-submitting identical content a no-op.
#[async_trait]
pub trait DocumentLedger: Send + Sync {
    async fn upsert(&self, document: &Document) -> Result<()>;

    async fn get(&self, document_id: &str) -> Result<Option<Document>>;

    async fn set_state(&self, document_id: &str, state: IngestState) -> Result<()>;

    async fn list(&self) -> Result<Vec<Document>>;

    async fn count(&self) -> Result<u64>;
}

/// In-memory ledger for tests.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: RwLock<HashMap<String, Document>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Document>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Document>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentLedger for InMemoryLedger {
    async fn upsert(&self, document: &Document) -> Result<()> {
        self.lock_write()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get(&self, document_id: &str) -> Result<Option<Document>> {
        Ok(self.lock_read().get(document_id).cloned())
    }

    async fn set_state(&self, document_id: &str, state: IngestState) -> Result<()> {
        let mut inner = self.lock_write();
        if let Some(doc) = inner.get_mut(document_id) {
            doc.state = state;
            doc.updated_at = unix_now();
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.lock_read().values().cloned().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.lock_read().len() as u64)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
