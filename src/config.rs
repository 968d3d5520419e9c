//! TOML configuration parsing and validation.
//!
//! Every section is optional and falls back to the defaults below, so a
//! minimal file only names the providers it uses. [`Config::validate`] runs
//! before any document is touched and reports invalid combinations as
//! [`Error::Config`].
//!
//! ```toml
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-large"
//! dims = 1024
//!
//! [retrieval]
//! top_k = 3
//! max_history = 8
//! max_context_tokens = 4000
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [index]
//! backend = "sqlite"
//! path = "./storage/vectordb/ragline.sqlite"
//! ```

use anyhow::{Context, Result};
use ragline_core::index::Metric;
use ragline_core::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::ingest::FailurePolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by neighbouring chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (Ollama or an OpenAI-compatible server).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    1024
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks retrieved per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Most recent conversation turns included in the prompt.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Token budget for the assembled prompt.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_history: default_max_history(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_max_history() -> usize {
    8
}
fn default_max_context_tokens() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Model context window; prompts above it are rejected before the call.
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            max_context_tokens: None,
            timeout_secs: default_llm_timeout_secs(),
            stream: default_stream(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_metric")]
    pub metric: String,
    /// SQLite database file (`sqlite` backend).
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Index host URL (`pinecone` backend).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            metric: default_metric(),
            path: default_index_path(),
            url: None,
            namespace: default_namespace(),
            upsert_batch_size: default_upsert_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_index_path() -> PathBuf {
    PathBuf::from("./storage/vectordb/ragline.sqlite")
}
fn default_namespace() -> String {
    "documents".to_string()
}
fn default_upsert_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents processed at once; results are still reported in order.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// First retry delay in milliseconds; doubles per attempt.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// `continue` with the rest of the batch or `abort` after a failed document.
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry_base_ms: default_retry_base_ms(),
            on_failure: FailurePolicy::default(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}
fn default_retry_base_ms() -> u64 {
    1000
}

impl Config {
    /// Check every parameter combination the pipelines rely on.
    pub fn validate(&self) -> ragline_core::Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::config("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(Error::config("retrieval.top_k must be >= 1"));
        }
        if self.retrieval.max_context_tokens == 0 {
            return Err(Error::config("retrieval.max_context_tokens must be > 0"));
        }
        if let Some(limit) = self.llm.max_context_tokens {
            if self.retrieval.max_context_tokens > limit {
                return Err(Error::config(format!(
                    "retrieval.max_context_tokens ({}) exceeds llm.max_context_tokens ({})",
                    self.retrieval.max_context_tokens, limit
                )));
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "hash" | "local" => {}
            other => {
                return Err(Error::config(format!(
                    "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hash, or local.",
                    other
                )))
            }
        }
        if self.embedding.dims == 0 {
            return Err(Error::config("embedding.dims must be > 0"));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be > 0"));
        }
        if matches!(self.embedding.provider.as_str(), "openai" | "ollama")
            && self.embedding.model.is_none()
        {
            return Err(Error::config(format!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            )));
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" => {}
            other => {
                return Err(Error::config(format!(
                    "Unknown llm provider: '{}'. Must be disabled or openai.",
                    other
                )))
            }
        }

        match self.index.backend.as_str() {
            "memory" | "sqlite" => {}
            "pinecone" => {
                if self.index.url.is_none() {
                    return Err(Error::config(
                        "index.url must be set when backend is 'pinecone'",
                    ));
                }
            }
            other => {
                return Err(Error::config(format!(
                    "Unknown index backend: '{}'. Must be memory, sqlite, or pinecone.",
                    other
                )))
            }
        }
        Metric::parse(&self.index.metric)?;
        if self.index.upsert_batch_size == 0 {
            return Err(Error::config("index.upsert_batch_size must be > 0"));
        }

        if self.ingest.concurrency == 0 {
            return Err(Error::config("ingest.concurrency must be >= 1"));
        }

        Ok(())
    }

    pub fn metric(&self) -> ragline_core::Result<Metric> {
        Metric::parse(&self.index.metric)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
