//! End-to-end pipeline tests over in-memory backends.
//!
//! Everything here runs offline: the hash embedder, the heuristic
//! extractor, and the extractive generator.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scholar::config::Config;
use scholar::embedding::{Embedder, EmbeddingGateway, HashEmbedder};
use scholar::ingest::{DocumentInput, IngestOutcome};
use scholar::llm::ExtractiveGenerator;
use scholar::Pipeline;
use scholar_core::error::{RagError, Result};
use scholar_core::extract::HeuristicExtractor;
use scholar_core::graph::{GraphCounts, GraphStore, InMemoryGraphStore, Neighbor};
use scholar_core::index::{InMemoryVectorIndex, Metric, VectorIndex};
use scholar_core::ledger::{DocumentLedger, InMemoryLedger};
use scholar_core::models::{Entity, IngestStage, IngestState, Relationship};

struct Backends {
    ledger: Arc<InMemoryLedger>,
    index: Arc<InMemoryVectorIndex>,
    graph: Arc<InMemoryGraphStore>,
}

fn test_config() -> Config {
    Config::minimal(PathBuf::from("unused.db"))
}

fn memory_pipeline(config: Config) -> (Arc<Pipeline>, Backends) {
    let ledger = Arc::new(InMemoryLedger::new());
    let index = Arc::new(InMemoryVectorIndex::new(Metric::Cosine));
    let graph = Arc::new(InMemoryGraphStore::new());
    let gateway = Arc::new(EmbeddingGateway::new(
        Arc::new(HashEmbedder::new(64).unwrap()),
        1024,
    ));
    let pipeline = Arc::new(Pipeline::new(
        config,
        ledger.clone(),
        index.clone(),
        graph.clone(),
        gateway,
        Arc::new(HeuristicExtractor::new()),
        Arc::new(ExtractiveGenerator),
    ));
    (pipeline, Backends { ledger, index, graph })
}

fn input(source: &str, text: &str) -> DocumentInput {
    DocumentInput {
        source: source.to_string(),
        title: None,
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_ingest_and_ask_end_to_end() {
    let (pipeline, backends) = memory_pipeline(test_config());

    let outcome = pipeline
        .ingest_text(
            "notes/curie.txt",
            Some("Curie".to_string()),
            "Marie Curie discovered radium in Paris. \
             Radium is a radioactive element studied in Physics.",
        )
        .await
        .unwrap();
    let IngestOutcome::Ingested { chunks, degraded, .. } = &outcome else {
        panic!("expected Ingested, got {outcome:?}");
    };
    assert!(*chunks >= 1);
    assert!(!degraded);

    let answer = pipeline
        .ask("who discovered radium?", None, true)
        .await
        .unwrap();
    assert!(answer.text.contains("Marie Curie"), "answer: {}", answer.text);
    assert!(!answer.citations.is_empty());
    assert!(!answer.graph_degraded);
    let labels: Vec<&str> = answer
        .related_entities
        .iter()
        .map(|r| r.entity.label.as_str())
        .collect();
    assert!(labels.contains(&"Marie Curie"), "entities: {labels:?}");

    let counts = backends.graph.counts().await.unwrap();
    assert!(counts.entities >= 2);
}

#[tokio::test]
async fn test_reingest_identical_content_is_noop() {
    let (pipeline, backends) = memory_pipeline(test_config());
    let text = "The same document, twice.";

    let first = pipeline.ingest_text("a.txt", None, text).await.unwrap();
    assert!(matches!(first, IngestOutcome::Ingested { .. }));
    let chunks_before = backends.index.len().await.unwrap();
    let graph_before = backends.graph.counts().await.unwrap();

    let second = pipeline.ingest_text("b.txt", None, text).await.unwrap();
    assert!(matches!(second, IngestOutcome::Unchanged { .. }));
    assert_eq!(first.document_id(), second.document_id());

    assert_eq!(backends.ledger.count().await.unwrap(), 1);
    assert_eq!(backends.index.len().await.unwrap(), chunks_before);
    assert_eq!(backends.graph.counts().await.unwrap(), graph_before);
}

#[tokio::test]
async fn test_ask_respects_top_k_with_non_increasing_scores() {
    let (pipeline, _) = memory_pipeline(test_config());
    for (i, topic) in ["rust ownership", "python decorators", "sql indexing"]
        .iter()
        .enumerate()
    {
        pipeline
            .ingest_text(&format!("doc{i}.txt"), None, &format!("All about {topic}."))
            .await
            .unwrap();
    }

    let answer = pipeline.ask("rust ownership", Some(2), false).await.unwrap();
    assert!(answer.citations.len() <= 2);
    for pair in answer.citations.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(answer.related_entities.is_empty());
}

#[tokio::test]
async fn test_small_window_chunking_round_trips_through_index() {
    let mut config = test_config();
    config.chunking.max_chars = 20;
    config.chunking.overlap = 5;
    let (pipeline, backends) = memory_pipeline(config);

    let outcome = pipeline
        .ingest_text("rag.txt", None, "RAG combines retrieval with generation.")
        .await
        .unwrap();
    let IngestOutcome::Ingested { chunks, .. } = &outcome else {
        panic!("expected Ingested");
    };
    assert!(*chunks >= 2);
    assert_eq!(backends.index.len().await.unwrap(), *chunks as u64);

    let answer = pipeline.ask("What is RAG?", None, false).await.unwrap();
    assert!(!answer.text.is_empty());
    assert!(!answer.citations.is_empty());
    for citation in &answer.citations {
        assert_eq!(citation.document_id, outcome.document_id());
        assert!(citation.chunk_id.starts_with(&citation.document_id[..12]));
    }
}

#[tokio::test]
async fn test_empty_document_completes_with_zero_chunks() {
    let (pipeline, backends) = memory_pipeline(test_config());
    let outcome = pipeline.ingest_text("empty.txt", None, "   \n\n  ").await.unwrap();
    assert!(matches!(
        outcome,
        IngestOutcome::Ingested { chunks: 0, degraded: false, .. }
    ));
    let doc = backends
        .ledger
        .get(outcome.document_id())
        .await
        .unwrap()
        .unwrap();
    assert!(doc.state.is_complete());
    assert_eq!(backends.index.len().await.unwrap(), 0);
}

// ============ failing backends ============

struct DownGraph;

macro_rules! graph_down {
    () => {
        Err(RagError::GraphUnavailable("connection refused".to_string()))
    };
}

#[async_trait]
impl GraphStore for DownGraph {
    async fn upsert_entity(&self, _: &Entity) -> Result<String> {
        graph_down!()
    }
    async fn upsert_relationship(&self, _: &Relationship) -> Result<()> {
        graph_down!()
    }
    async fn record_mention(&self, _: &str, _: &str) -> Result<()> {
        graph_down!()
    }
    async fn entities_in_chunks(&self, _: &[String]) -> Result<Vec<(String, Entity)>> {
        graph_down!()
    }
    async fn neighbors(&self, _: &str, _: usize) -> Result<Vec<Neighbor>> {
        graph_down!()
    }
    async fn relationship_observations(&self, _: &str, _: &str, _: &str) -> Result<Option<u64>> {
        graph_down!()
    }
    async fn counts(&self) -> Result<GraphCounts> {
        graph_down!()
    }
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn model_name(&self) -> &str {
        "down"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed_batch(&self, _: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::EmbeddingUnavailable("timeout".to_string()))
    }
}

fn pipeline_with(
    config: Config,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
) -> (Arc<Pipeline>, Arc<InMemoryLedger>, Arc<InMemoryVectorIndex>) {
    let ledger = Arc::new(InMemoryLedger::new());
    let index = Arc::new(InMemoryVectorIndex::new(Metric::Cosine));
    let pipeline = Arc::new(Pipeline::new(
        config,
        ledger.clone(),
        index.clone(),
        graph,
        Arc::new(EmbeddingGateway::new(embedder, 1024)),
        Arc::new(HeuristicExtractor::new()),
        Arc::new(ExtractiveGenerator),
    ));
    (pipeline, ledger, index)
}

#[tokio::test]
async fn test_graph_outage_degrades_ingest_and_ask() {
    let (pipeline, ledger, index) = pipeline_with(
        test_config(),
        Arc::new(DownGraph),
        Arc::new(HashEmbedder::new(64).unwrap()),
    );

    let outcome = pipeline
        .ingest_text("doc.txt", None, "Gravity bends Light near massive objects.")
        .await
        .unwrap();
    let IngestOutcome::Ingested { degraded, .. } = &outcome else {
        panic!("expected Ingested");
    };
    assert!(degraded, "graph outage should degrade, not fail");

    let doc = ledger.get(outcome.document_id()).await.unwrap().unwrap();
    assert_eq!(doc.state, IngestState::Complete { degraded: true });
    assert!(index.len().await.unwrap() >= 1, "vector search must stay usable");

    let answer = pipeline.ask("what bends light?", None, true).await.unwrap();
    assert!(answer.graph_degraded);
    assert!(answer.related_entities.is_empty());
    assert!(!answer.citations.is_empty());
}

#[tokio::test]
async fn test_embedding_outage_fails_before_any_commit() {
    let (pipeline, ledger, index) = pipeline_with(
        test_config(),
        Arc::new(InMemoryGraphStore::new()),
        Arc::new(DownEmbedder),
    );

    let err = pipeline
        .ingest_text("doc.txt", None, "some content")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::EmbeddingUnavailable(_)));

    let docs = ledger.list().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(
        docs[0].state,
        IngestState::Failed {
            stage: IngestStage::Embed,
            reason: "embedding backend unavailable: timeout".to_string(),
        }
    );
    assert_eq!(index.len().await.unwrap(), 0, "nothing may be committed");
}

#[tokio::test]
async fn test_duplicate_edges_increment_observations() {
    let (pipeline, backends) = memory_pipeline(test_config());
    pipeline
        .ingest_text("one.txt", None, "Alice met Bob. First account.")
        .await
        .unwrap();
    pipeline
        .ingest_text("two.txt", None, "Alice met Bob. Second account.")
        .await
        .unwrap();

    let alice = Entity::new("Alice", "CONCEPT").stable_id();
    let bob = Entity::new("Bob", "CONCEPT").stable_id();
    let observations = backends
        .graph
        .relationship_observations(&alice, &bob, "CO_OCCURS_WITH")
        .await
        .unwrap();
    assert_eq!(observations, Some(2));

    // still one edge and one node per entity
    let counts = backends.graph.counts().await.unwrap();
    assert!(counts.entities >= 2);
}

#[tokio::test]
async fn test_concurrent_ingest_of_ten_documents() {
    let (pipeline, backends) = memory_pipeline(test_config());
    let inputs: Vec<DocumentInput> = (0..10)
        .map(|i| {
            input(
                &format!("doc{i}.txt"),
                &format!("Document number {i} talks about Topic{i} in detail."),
            )
        })
        .collect();

    let results = pipeline
        .ingest_many(inputs, &CancellationToken::new())
        .await;
    assert_eq!(results.len(), 10);
    for result in &results {
        assert!(matches!(
            result,
            Ok(IngestOutcome::Ingested { degraded: false, .. })
        ));
    }
    assert_eq!(backends.ledger.count().await.unwrap(), 10);
    assert_eq!(backends.index.len().await.unwrap(), 10);

    // one retrieval afterwards: every hit comes from the ten documents,
    // no chunk appears twice
    let ingested: std::collections::HashSet<&str> =
        results.iter().map(|r| r.as_ref().unwrap().document_id()).collect();
    let answer = pipeline.ask("Topic3 in detail", Some(10), false).await.unwrap();
    let mut seen_chunks = std::collections::HashSet::new();
    for citation in &answer.citations {
        assert!(ingested.contains(citation.document_id.as_str()));
        assert!(seen_chunks.insert(citation.chunk_id.clone()));
    }
}

#[tokio::test]
async fn test_cancellation_stops_before_commit() {
    let (pipeline, backends) = memory_pipeline(test_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = pipeline
        .ingest_many(vec![input("doc.txt", "cancelled content")], &cancel)
        .await;
    assert!(results[0].is_err());
    assert_eq!(backends.index.len().await.unwrap(), 0);

    // retry after cancellation succeeds; upserts are idempotent
    let outcome = pipeline
        .ingest_text("doc.txt", None, "cancelled content")
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Ingested { .. }));
}

/// Embedder whose calls never complete, standing in for a hung backend.
struct StuckEmbedder;

#[async_trait]
impl Embedder for StuckEmbedder {
    fn model_name(&self) -> &str {
        "stuck"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed_batch(&self, _: &[String]) -> Result<Vec<Vec<f32>>> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_embedding() {
    let (pipeline, _, index) = pipeline_with(
        test_config(),
        Arc::new(InMemoryGraphStore::new()),
        Arc::new(StuckEmbedder),
    );
    let cancel = CancellationToken::new();

    let worker = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pipeline
                .ingest_many(vec![input("doc.txt", "content behind a hung backend")], &cancel)
                .await
        })
    };

    // let the ingest reach the embed call, then pull the plug
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();

    let results = tokio::time::timeout(std::time::Duration::from_secs(5), worker)
        .await
        .expect("cancellation must not wait out the hung call")
        .unwrap();
    assert!(results[0].is_err());
    assert_eq!(index.len().await.unwrap(), 0);
}
