//! # Scholar CLI (`scholar`)
//!
//! Commands for database initialization, document ingestion, question
//! answering, and system statistics.
//!
//! ```bash
//! scholar --config ./config/scholar.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scholar init` | Create the SQLite database and run schema migrations |
//! | `scholar ingest <paths>` | Ingest UTF-8 text files into both indexes |
//! | `scholar ask "<question>"` | Answer a question with citations |
//! | `scholar stats` | Document/chunk/entity counts and backend health |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use scholar::config;
use scholar::ingest::{DocumentInput, IngestOutcome};
use scholar::stats::print_stats;
use scholar::Pipeline;

/// Scholar: a hybrid retrieval-augmented answering engine over a
/// vector index and a knowledge graph.
#[derive(Parser)]
#[command(
    name = "scholar",
    about = "A hybrid retrieval-augmented answering engine",
    version,
    long_about = "Scholar ingests plain-text documents into a vector index and a knowledge \
    graph, then answers questions by merging similarity search with graph entity expansion \
    and generating a cited answer."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scholar.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Ingest UTF-8 text files.
    ///
    /// Each file is cleaned, chunked, embedded, vector-indexed, and
    /// entity-extracted into the knowledge graph. Files whose content
    /// was already ingested are skipped. Independent files are
    /// processed concurrently.
    Ingest {
        /// Files to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer a question from the indexed corpus.
    Ask {
        /// The question.
        question: String,

        /// Number of chunks to retrieve (defaults to retrieval.top_k).
        #[arg(long)]
        top_k: Option<usize>,

        /// Skip knowledge-graph entity expansion.
        #[arg(long)]
        no_entities: bool,
    },

    /// Show document, chunk, and graph counts plus backend health.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scholar=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            Pipeline::open(cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { paths } => {
            let pipeline = Arc::new(Pipeline::open(cfg).await?);
            let mut inputs = Vec::with_capacity(paths.len());
            for path in &paths {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
                inputs.push(DocumentInput {
                    source: path.display().to_string(),
                    title: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
                    text,
                });
            }

            let cancel = CancellationToken::new();
            let results = pipeline.ingest_many(inputs, &cancel).await;
            let mut failures = 0usize;
            for (path, result) in paths.iter().zip(results) {
                match result {
                    Ok(IngestOutcome::Ingested {
                        document_id,
                        chunks,
                        degraded,
                    }) => {
                        let note = if degraded { " (graph unavailable)" } else { "" };
                        println!(
                            "Ingested {} -> {} ({chunks} chunks){note}",
                            path.display(),
                            &document_id[..12.min(document_id.len())]
                        );
                    }
                    Ok(IngestOutcome::Unchanged { document_id }) => {
                        println!(
                            "Unchanged {} -> {}",
                            path.display(),
                            &document_id[..12.min(document_id.len())]
                        );
                    }
                    Err(e) => {
                        failures += 1;
                        eprintln!("Failed {}: {e}", path.display());
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} document(s) failed to ingest");
            }
        }
        Commands::Ask {
            question,
            top_k,
            no_entities,
        } => {
            let pipeline = Pipeline::open(cfg).await?;
            let answer = pipeline.ask(&question, top_k, !no_entities).await?;

            println!("{}", answer.text);
            if !answer.citations.is_empty() {
                println!("\nSources:");
                for citation in &answer.citations {
                    println!(
                        "  [{}] chunk {} (score {:.3})",
                        &citation.document_id[..12.min(citation.document_id.len())],
                        citation.chunk_index,
                        citation.score
                    );
                }
            }
            if !answer.related_entities.is_empty() {
                println!("\nRelated entities:");
                for related in &answer.related_entities {
                    println!(
                        "  {} ({}, {} hop{})",
                        related.entity.label,
                        related.entity.kind,
                        related.hops,
                        if related.hops == 1 { "" } else { "s" }
                    );
                }
            }
            if answer.graph_degraded {
                eprintln!("\nNote: knowledge graph was unavailable; entities omitted.");
            }
        }
        Commands::Stats => {
            let pipeline = Pipeline::open(cfg).await?;
            let stats = pipeline.stats().await?;
            print_stats(&stats);
        }
    }

    Ok(())
}
