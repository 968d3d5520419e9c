//! Component wiring from a validated [`Config`].
//!
//! Every CLI command starts from an [`App`]: the embedder and the index are
//! opened once and shared by the ingestion and query pipelines, so both sides
//! always agree on vector size and metric.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ragline_core::assemble::ContextAssembler;
use ragline_core::chunk::Chunker;
use ragline_core::embedding::Embedder;
use ragline_core::generate::ResponseGenerator;
use ragline_core::index::VectorIndex;
use tracing::debug;

use crate::config::Config;
use crate::embedding;
use crate::index;
use crate::ingest::IngestionPipeline;
use crate::llm;
use crate::query::QueryPipeline;
use crate::retry::RetryPolicy;

pub struct App {
    pub config: Config,
    pub embedder: Embedder,
    pub index: Arc<dyn VectorIndex>,
}

impl App {
    /// Create the embedding provider and open the configured index.
    pub async fn open(config: Config) -> Result<Self> {
        let provider = embedding::create_provider(&config.embedding)?;
        let embedder = Embedder::new(provider, config.embedding.batch_size)?;
        let index = index::open_index(&config, embedder.dims()).await?;
        debug!(
            provider = %config.embedding.provider,
            model = embedder.model_name(),
            dims = embedder.dims(),
            backend = %config.index.backend,
            metric = index.metric().as_str(),
            "components ready"
        );
        Ok(Self {
            config,
            embedder,
            index,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.embedding.max_retries,
            Duration::from_millis(self.config.ingest.retry_base_ms),
        )
    }

    pub fn ingestion(&self) -> Result<IngestionPipeline> {
        let chunker = Chunker::new(
            self.config.chunking.chunk_size,
            self.config.chunking.chunk_overlap,
        )?;
        let pipeline = IngestionPipeline::new(chunker, self.embedder.clone(), self.index.clone())?
            .with_retry(self.retry_policy())
            .with_concurrency(self.config.ingest.concurrency)
            .with_failure_policy(self.config.ingest.on_failure);
        Ok(pipeline)
    }

    pub fn query(&self) -> Result<QueryPipeline> {
        let model = llm::create_model(&self.config.llm)?;
        let pipeline = QueryPipeline::new(
            self.embedder.clone(),
            self.index.clone(),
            ContextAssembler::new(self.config.retrieval.max_history),
            ResponseGenerator::new(model),
            self.config.retrieval.top_k,
            self.config.retrieval.max_context_tokens,
        )?
        .with_retry(self.retry_policy());
        Ok(pipeline)
    }
}
