//! # Scholar
//!
//! **A hybrid retrieval-augmented answering engine.**
//!
//! Scholar ingests plain-text documents into two indexes at once: a
//! vector index for similarity search and a knowledge graph of the
//! entities the documents mention. Questions are answered by merging
//! both, the top chunks by embedding similarity plus the entities
//! reachable from them in the graph, then handing the composed context
//! to a generation provider. Every answer carries citations back to
//! the chunks it was grounded on.
//!
//! ## Data Flow
//!
//! 1. **Ingestion** ([`ingest`]) cleans the text, derives a
//!    content-hash identity, chunks it, embeds every chunk, commits
//!    vectors, extracts entities, and writes the graph. Graph outages
//!    degrade the document instead of failing it.
//! 2. **Retrieval** (`scholar_core::retrieve`) runs vector search and
//!    expands entities from the hit chunks through the graph.
//! 3. **Composition** (`scholar_core::compose`) budgets the retrieved
//!    passages into a prompt and tracks citations.
//! 4. **Generation** ([`llm`]) produces the answer text.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`sqlite_store`] | SQLite vector index, graph store, document ledger |
//! | [`embedding`] | Embedding providers and the single-flight caching gateway |
//! | [`llm`] | Generation providers: extractive and Gemini |
//! | [`extract`] | LLM-backed entity extraction |
//! | [`ingest`] | Ingestion state machine and concurrent batch driver |
//! | [`ask`] | Question answering: embed, retrieve, compose, generate |
//! | [`stats`] | Store counts and backend health |
//! | [`pipeline`] | Backend wiring and the public [`pipeline::Pipeline`] API |
//!
//! ## Quick Start
//!
//! ```bash
//! scholar init                      # create the database
//! scholar ingest notes/*.txt        # index documents
//! scholar ask "what is radium?"     # answer with citations
//! scholar stats                     # counts and backend health
//! ```

pub mod ask;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod retry;
pub mod sqlite_store;
pub mod stats;

pub use ingest::{DocumentInput, IngestOutcome};
pub use pipeline::Pipeline;
pub use scholar_core::models::Answer;
