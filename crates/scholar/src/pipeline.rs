//! Pipeline assembly: configured backends behind one handle.
//!
//! [`Pipeline`] owns the ledger, vector index, graph store, embedding
//! gateway, extractor, and generator, and exposes the operations the
//! CLI (or an embedding application) calls: `ingest_text`,
//! `ingest_path`, `ingest_many`, `ask`, `stats`. [`Pipeline::open`]
//! wires the SQLite backends from configuration; [`Pipeline::new`]
//! accepts arbitrary trait objects, which is how tests run everything
//! in memory.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use scholar_core::error::Result;
use scholar_core::extract::{EntityExtractor, HeuristicExtractor};
use scholar_core::graph::GraphStore;
use scholar_core::index::VectorIndex;
use scholar_core::ledger::DocumentLedger;
use scholar_core::models::Answer;

use crate::ask;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, EmbeddingGateway};
use crate::extract::LlmExtractor;
use crate::ingest::{self, DocumentInput, IngestOutcome};
use crate::llm::{create_generator, Generator};
use crate::migrate;
use crate::sqlite_store::{SqliteGraphStore, SqliteLedger, SqliteVectorIndex};
use crate::stats::{self, Stats};

pub struct Pipeline {
    pub(crate) config: Config,
    pub(crate) ledger: Arc<dyn DocumentLedger>,
    pub(crate) index: Arc<dyn VectorIndex>,
    pub(crate) graph: Arc<dyn GraphStore>,
    pub(crate) gateway: Arc<EmbeddingGateway>,
    pub(crate) extractor: Arc<dyn EntityExtractor>,
    pub(crate) generator: Arc<dyn Generator>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit backends.
    pub fn new(
        config: Config,
        ledger: Arc<dyn DocumentLedger>,
        index: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        gateway: Arc<EmbeddingGateway>,
        extractor: Arc<dyn EntityExtractor>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            config,
            ledger,
            index,
            graph,
            gateway,
            extractor,
            generator,
        }
    }

    /// Open the SQLite-backed pipeline described by the configuration.
    /// Runs migrations, so the database is ready afterwards.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;

        let metric = config.metric()?;
        let ledger: Arc<dyn DocumentLedger> = Arc::new(SqliteLedger::new(pool.clone()));
        let index: Arc<dyn VectorIndex> =
            Arc::new(SqliteVectorIndex::open(pool.clone(), metric).await?);
        let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool));

        let embedder = create_embedder(&config.embedding)?;
        let gateway = Arc::new(EmbeddingGateway::new(
            embedder,
            config.embedding.cache_capacity,
        ));
        let generator = create_generator(&config.generation)?;
        let extractor: Arc<dyn EntityExtractor> = match config.extraction.mode.as_str() {
            "llm" => Arc::new(LlmExtractor::new(generator.clone())),
            _ => Arc::new(HeuristicExtractor::new()),
        };

        Ok(Self::new(
            config, ledger, index, graph, gateway, extractor, generator,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest one text document.
    pub async fn ingest_text(
        &self,
        source: &str,
        title: Option<String>,
        text: &str,
    ) -> Result<IngestOutcome> {
        let input = DocumentInput {
            source: source.to_string(),
            title,
            text: text.to_string(),
        };
        ingest::ingest_document(self, &input, &CancellationToken::new()).await
    }

    /// Ingest a UTF-8 text file from disk.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestOutcome> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());
        self.ingest_text(&path.display().to_string(), title, &text)
            .await
    }

    /// Ingest many documents concurrently. Results are in input order;
    /// per-document failures do not abort the batch.
    pub async fn ingest_many(
        self: &Arc<Self>,
        inputs: Vec<DocumentInput>,
        cancel: &CancellationToken,
    ) -> Vec<Result<IngestOutcome>> {
        ingest::ingest_documents(self, inputs, self.config.ingest.concurrency, cancel).await
    }

    /// Answer a question from the indexed corpus.
    pub async fn ask(
        &self,
        question: &str,
        top_k: Option<usize>,
        include_entities: bool,
    ) -> Result<Answer> {
        ask::ask(self, question, top_k, include_entities).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        stats::collect(self).await
    }
}
