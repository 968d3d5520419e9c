//! Concrete embedding providers.
//!
//! Implements [`EmbeddingProvider`] for:
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings` on OpenAI or any compatible server.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashProvider`]**: deterministic feature hashing, offline and dependency free.
//! - **`LocalProvider`**: fastembed models run in-process (feature `local-embeddings-fastembed`).
//!
//! Providers make exactly one request per [`embed_batch`](EmbeddingProvider::embed_batch)
//! call. Failures carry a retryable flag (HTTP 429, 5xx, and network errors
//! are retryable; other 4xx are not) and the ingestion and query pipelines
//! decide whether to back off and try again.
//!
//! Use [`create_provider`] to pick the implementation from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use ragline_core::embedding::EmbeddingProvider;
use ragline_core::{Error, Result};
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::http;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
/// OpenAI rejects requests with more inputs than this.
const OPENAI_MAX_INPUTS: usize = 2048;

// ============ Disabled Provider ============

/// Provider used when `embedding.provider = "disabled"`.
pub struct DisabledProvider {
    dims: usize,
}

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::embedding(
            "Embedding provider is disabled; set [embedding] provider in the config",
            false,
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable. For
/// `text-embedding-3-*` models the configured `dims` is sent as the
/// `dimensions` parameter so the API returns vectors of that size.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::config("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims,
        })
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dims);
        }
        body
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        OPENAI_MAX_INPUTS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/embeddings", self.url);
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(texts))
            .send()
            .await
            .map_err(|e| {
                Error::embedding(http::describe_transport("OpenAI", &endpoint, &e), true)
            })?;

        if !response.status().is_success() {
            let (message, retryable) = http::describe_failure("OpenAI", response).await;
            return Err(Error::embedding(message, retryable));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Invalid OpenAI response: {}", e), true))?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::embedding("Invalid OpenAI response: missing data array", false))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::embedding("Invalid OpenAI response: missing embedding", false))?;
        indexed.push((index, json_floats(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn json_floats(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::embedding("Invalid embedding: non-numeric component", false))
        })
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            model,
            dims: config.dims,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::embedding(
                    format!(
                        "{} (is Ollama running?)",
                        http::describe_transport("Ollama", &endpoint, &e)
                    ),
                    true,
                )
            })?;

        if !response.status().is_success() {
            let (message, retryable) = http::describe_failure("Ollama", response).await;
            return Err(Error::embedding(message, retryable));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Invalid Ollama response: {}", e), true))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::embedding("Invalid Ollama response: missing embeddings array", false)
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding.as_array().ok_or_else(|| {
                Error::embedding("Invalid Ollama response: embedding is not an array", false)
            })?;
            json_floats(values)
        })
        .collect()
}

// ============ Hash Provider ============

/// Deterministic bag-of-words embeddings via feature hashing.
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets with a hash-derived sign, and the result is L2
/// normalized. Texts sharing vocabulary land close together under cosine
/// similarity, which is enough for offline use and tests.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::config("embedding.dims must be > 0"));
        }
        Ok(Self { dims })
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============ Local Provider (fastembed) ============

/// In-process embeddings via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached;
/// afterwards no network calls are made. Inference runs on the blocking
/// thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    inner: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        use std::str::FromStr;

        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "BAAI/bge-large-en-v1.5".to_string());
        let model = fastembed::EmbeddingModel::from_str(&model_name).map_err(|e| {
            Error::config(format!("Unknown local embedding model '{}': {}", model_name, e))
        })?;
        let info = fastembed::TextEmbedding::get_model_info(&model).map_err(|e| {
            Error::config(format!("No metadata for local model '{}': {}", model_name, e))
        })?;
        if info.dim != config.dims {
            return Err(Error::config(format!(
                "embedding.dims is {} but local model '{}' produces {}",
                config.dims, model_name, info.dim
            )));
        }

        let inner = fastembed::TextEmbedding::try_new(
            fastembed::TextInitOptions::new(model).with_show_download_progress(true),
        )
        .map_err(|e| Error::config(format!("Failed to initialize local embedding model: {}", e)))?;

        Ok(Self {
            model_name,
            dims: info.dim,
            inner: Arc::new(std::sync::Mutex::new(inner)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = inner
                .lock()
                .map_err(|_| Error::embedding("local embedding model lock poisoned", false))?;
            model
                .embed(texts, None)
                .map_err(|e| Error::embedding(format!("Local embedding failed: {}", e), false))
        })
        .await
        .map_err(|e| Error::embedding(format!("Local embedding task failed: {}", e), false))?
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"hash"` | [`HashProvider`] |
/// | `"local"` | `LocalProvider` (requires `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider { dims: config.dims })),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "hash" => Ok(Arc::new(HashProvider::new(config.dims)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(Error::config(
            "Local embedding provider requires --features local-embeddings-fastembed",
        )),
        other => Err(Error::config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}
