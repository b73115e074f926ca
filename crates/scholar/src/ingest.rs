//! Ingestion pipeline orchestration.
//!
//! Drives one document through the state machine: clean → chunk →
//! embed → vector index → extract entities → graph index. Commit order
//! is the partial-failure policy: every chunk embedding exists before
//! the first vector is written, and the vector index is fully
//! committed before the first graph write, so a graph outage can only
//! ever produce a searchable-but-unenriched document
//! (`Complete { degraded: true }`), never a half-indexed one.
//!
//! Failures before the vector index commits are fatal and leave the
//! ledger in `Failed { stage, reason }`. All writes are idempotent
//! upserts keyed by content-derived ids, so re-running ingestion is the
//! recovery path after any failure or cancellation.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scholar_core::chunk::chunk_text;
use scholar_core::error::{RagError, Result};
use scholar_core::extract::Extraction;
use scholar_core::models::{document_id, Chunk, Document, IngestStage, IngestState};

use crate::pipeline::Pipeline;

/// One document handed to ingestion.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub source: String,
    pub title: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested {
        document_id: String,
        chunks: usize,
        degraded: bool,
    },
    /// Content hash already reached `Complete`; nothing was done.
    Unchanged { document_id: String },
}

impl IngestOutcome {
    pub fn document_id(&self) -> &str {
        match self {
            IngestOutcome::Ingested { document_id, .. } => document_id,
            IngestOutcome::Unchanged { document_id } => document_id,
        }
    }
}

/// Whitespace cleanup applied before hashing and chunking: collapse
/// runs of spaces and tabs, drop carriage returns, collapse blank-line
/// runs to one, trim.
pub fn clean_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_pending = false;
    for line in raw.replace('\r', "").lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_pending = !lines.is_empty();
            continue;
        }
        if blank_pending {
            lines.push(String::new());
            blank_pending = false;
        }
        lines.push(collapsed);
    }
    lines.join("\n")
}

async fn fail(p: &Pipeline, doc_id: &str, stage: IngestStage, err: RagError) -> RagError {
    warn!(document = %doc_id, %stage, error = %err, "ingestion failed");
    let state = IngestState::Failed {
        stage,
        reason: err.to_string(),
    };
    if let Err(e) = p.ledger.set_state(doc_id, state).await {
        warn!(document = %doc_id, error = %e, "could not record failure state");
    }
    err
}

fn cancelled() -> RagError {
    RagError::Internal(anyhow::anyhow!("ingestion cancelled"))
}

/// Race a network-bound stage against cancellation. Dropping the stage
/// future aborts its outstanding calls; idempotent upserts make
/// re-ingestion the recovery path for anything half-written.
async fn abortable<F, T>(cancel: &CancellationToken, stage: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        result = stage => result,
    }
}

pub(crate) async fn ingest_document(
    p: &Pipeline,
    input: &DocumentInput,
    cancel: &CancellationToken,
) -> Result<IngestOutcome> {
    let text = clean_text(&input.text);
    let doc_id = document_id(&text);

    if let Some(existing) = p.ledger.get(&doc_id).await? {
        if existing.state.is_complete() {
            info!(document = %doc_id, source = %input.source, "content unchanged, skipping");
            return Ok(IngestOutcome::Unchanged {
                document_id: doc_id,
            });
        }
    }

    let now = chrono::Utc::now().timestamp();
    let mut doc = Document {
        id: doc_id.clone(),
        source: input.source.clone(),
        title: input.title.clone(),
        metadata: Default::default(),
        state: IngestState::Received,
        created_at: now,
        updated_at: now,
        chunk_count: 0,
    };
    p.ledger.upsert(&doc).await?;
    p.ledger.set_state(&doc_id, IngestState::Parsed).await?;

    // Chunk
    let chunks = match chunk_text(
        &doc_id,
        &text,
        p.config.chunking.max_chars,
        p.config.chunking.overlap,
    ) {
        Ok(chunks) => chunks,
        Err(e) => return Err(fail(p, &doc_id, IngestStage::Chunk, e).await),
    };
    if chunks.is_empty() {
        doc.state = IngestState::Complete { degraded: false };
        p.ledger.upsert(&doc).await?;
        return Ok(IngestOutcome::Ingested {
            document_id: doc_id,
            chunks: 0,
            degraded: false,
        });
    }
    doc.chunk_count = chunks.len() as i64;
    doc.state = IngestState::Chunked;
    p.ledger.upsert(&doc).await?;

    // Embed everything before committing anything
    let vectors = match abortable(cancel, embed_chunks(p, &chunks)).await {
        Ok(vectors) => vectors,
        Err(e) if cancel.is_cancelled() => return Err(e),
        Err(e) => return Err(fail(p, &doc_id, IngestStage::Embed, e).await),
    };
    p.ledger.set_state(&doc_id, IngestState::Embedded).await?;

    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    // Vector index commit
    for (chunk, vector) in chunks.iter().zip(&vectors) {
        if let Err(e) = p.index.upsert(chunk, vector).await {
            return Err(fail(p, &doc_id, IngestStage::VectorIndex, e).await);
        }
    }
    p.ledger
        .set_state(&doc_id, IngestState::VectorIndexed)
        .await?;

    // Entity extraction, best effort per chunk
    let extractions = match abortable(cancel, extract_entities(p, &chunks)).await {
        Ok(extractions) => extractions,
        Err(e) if cancel.is_cancelled() => return Err(e),
        Err(e) => return Err(fail(p, &doc_id, IngestStage::ExtractEntities, e).await),
    };
    p.ledger
        .set_state(&doc_id, IngestState::EntitiesExtracted)
        .await?;

    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    // Graph commit; the vector index is already live, so an outage here
    // degrades instead of failing
    match abortable(cancel, index_graph(p, &chunks, &extractions)).await {
        Ok(()) => {
            p.ledger
                .set_state(&doc_id, IngestState::GraphIndexed)
                .await?;
            p.ledger
                .set_state(&doc_id, IngestState::Complete { degraded: false })
                .await?;
            info!(document = %doc_id, chunks = chunks.len(), "document ingested");
            Ok(IngestOutcome::Ingested {
                document_id: doc_id,
                chunks: chunks.len(),
                degraded: false,
            })
        }
        Err(RagError::GraphUnavailable(reason)) => {
            warn!(document = %doc_id, %reason, "graph unavailable, document ingested without enrichment");
            p.ledger
                .set_state(&doc_id, IngestState::Complete { degraded: true })
                .await?;
            Ok(IngestOutcome::Ingested {
                document_id: doc_id,
                chunks: chunks.len(),
                degraded: true,
            })
        }
        Err(e) if cancel.is_cancelled() => Err(e),
        Err(e) => Err(fail(p, &doc_id, IngestStage::GraphIndex, e).await),
    }
}

/// Extract entities per chunk. Degradable failures count as zero
/// entities for that chunk; anything else aborts the stage.
async fn extract_entities(p: &Pipeline, chunks: &[Chunk]) -> Result<Vec<Extraction>> {
    let mut extractions = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match p.extractor.extract(chunk).await {
            Ok(extraction) => extractions.push(extraction),
            Err(e) if e.is_degradable() => {
                warn!(chunk = %chunk.id, error = %e, "extraction failed, treating as zero entities");
                extractions.push(Extraction::default());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(extractions)
}

/// Embed every chunk in provider batches, preserving order.
async fn embed_chunks(p: &Pipeline, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(p.config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        vectors.extend(p.gateway.embed_batch(&texts).await?);
    }
    Ok(vectors)
}

async fn index_graph(p: &Pipeline, chunks: &[Chunk], extractions: &[Extraction]) -> Result<()> {
    for (chunk, extraction) in chunks.iter().zip(extractions) {
        for entity in &extraction.entities {
            let entity_id = p.graph.upsert_entity(entity).await?;
            p.graph.record_mention(&entity_id, &chunk.id).await?;
        }
        for rel in &extraction.relationships {
            p.graph.upsert_relationship(rel).await?;
        }
    }
    Ok(())
}

/// Ingest independent documents concurrently, up to `concurrency` at a
/// time. Results come back in input order; one document failing does
/// not stop the others.
pub(crate) async fn ingest_documents(
    p: &Arc<Pipeline>,
    inputs: Vec<DocumentInput>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Vec<Result<IngestOutcome>> {
    let concurrency = concurrency.max(1);
    let mut results: Vec<Option<Result<IngestOutcome>>> =
        inputs.iter().map(|_| None).collect();
    let mut set: JoinSet<(usize, Result<IngestOutcome>)> = JoinSet::new();

    for (i, input) in inputs.into_iter().enumerate() {
        while set.len() >= concurrency {
            if let Some(joined) = set.join_next().await {
                record(&mut results, joined);
            }
        }
        let p = Arc::clone(p);
        let cancel = cancel.clone();
        set.spawn(async move {
            let outcome = ingest_document(&p, &input, &cancel).await;
            (i, outcome)
        });
    }
    while let Some(joined) = set.join_next().await {
        record(&mut results, joined);
    }

    results
        .into_iter()
        .map(|r| {
            r.unwrap_or_else(|| Err(RagError::Internal(anyhow::anyhow!("ingestion task lost"))))
        })
        .collect()
}

fn record(
    results: &mut [Option<Result<IngestOutcome>>],
    joined: std::result::Result<(usize, Result<IngestOutcome>), tokio::task::JoinError>,
) {
    match joined {
        Ok((i, outcome)) => results[i] = Some(outcome),
        Err(e) => warn!(error = %e, "ingestion task panicked"),
    }
}
