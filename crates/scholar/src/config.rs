use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use scholar_core::index::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_max_related_entities")]
    pub max_related_entities: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            metric: default_metric(),
            max_hops: default_max_hops(),
            max_related_entities: default_max_related_entities(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_max_hops() -> usize {
    1
}
fn default_max_related_entities() -> usize {
    10
}
fn default_max_context_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (deterministic local features) or `http` (OpenAI-style
    /// embeddings endpoint).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            endpoint: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `extractive` (answer from retrieved passages, no network) or
    /// `gemini` (Google generateContent endpoint, requires
    /// `GEMINI_API_KEY`).
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_generation_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// `heuristic` (regex, offline) or `llm` (structured extraction via
    /// the generation provider).
    #[serde(default = "default_extraction_mode")]
    pub mode: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: default_extraction_mode(),
        }
    }
}

fn default_extraction_mode() -> String {
    "heuristic".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents processed concurrently by `scholar ingest`.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

impl Config {
    pub fn metric(&self) -> Result<Metric> {
        Ok(Metric::parse(&self.retrieval.metric)?)
    }

    /// Minimal config for tests: in-memory-ish paths and local providers.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            extraction: ExtractionConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap must be < chunking.max_chars");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_context_chars == 0 {
        anyhow::bail!("retrieval.max_context_chars must be > 0");
    }
    config.metric()?;

    // Validate embedding
    match config.embedding.provider.as_str() {
        "hash" => {}
        "http" => {
            if config.embedding.endpoint.is_none() {
                anyhow::bail!("embedding.endpoint must be set when provider is 'http'");
            }
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set when provider is 'http'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or http.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "extractive" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be extractive or gemini.",
            other
        ),
    }

    // Validate extraction
    match config.extraction.mode.as_str() {
        "heuristic" | "llm" => {}
        other => anyhow::bail!(
            "Unknown extraction mode: '{}'. Must be heuristic or llm.",
            other
        ),
    }

    if config.ingest.concurrency == 0 {
        anyhow::bail!("ingest.concurrency must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_defaults_applied() {
        let f = write_config("[db]\npath = \"data/scholar.db\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.max_chars, 500);
        assert_eq!(cfg.chunking.overlap, 50);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.max_context_chars, 4000);
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.generation.provider, "extractive");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max() {
        let f = write_config(
            "[db]\npath = \"x.db\"\n[chunking]\nmax_chars = 100\noverlap = 100\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_http_embedding_requires_endpoint_model_dims() {
        let f = write_config("[db]\npath = \"x.db\"\n[embedding]\nprovider = \"http\"\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config(
            "[db]\npath = \"x.db\"\n[embedding]\nprovider = \"http\"\n\
             endpoint = \"https://api.openai.com/v1/embeddings\"\n\
             model = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        assert!(load_config(f.path()).is_ok());
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let f = write_config("[db]\npath = \"x.db\"\n[retrieval]\nmetric = \"euclidean\"\n");
        assert!(load_config(f.path()).is_err());
    }
}
