//! Error taxonomy shared by every stage of the retrieval pipeline.
//!
//! Each variant maps to one failure class the orchestrators react to
//! differently: configuration problems stop everything before work starts,
//! transient service errors are retried with backoff, and dimension
//! mismatches are always fatal.

use thiserror::Error;

/// Result alias used across the core crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameters; raised before any document is processed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The embedding provider rejected or failed a request.
    #[error("embedding service error: {message}")]
    EmbeddingService { message: String, retryable: bool },

    /// Some or all entries of an upsert were not written.
    #[error("index write error ({} key(s) failed): {message}", failed_keys.len())]
    IndexWrite {
        failed_keys: Vec<String>,
        message: String,
        retryable: bool,
    },

    /// A similarity search or delete could not be served.
    #[error("index search error: {message}")]
    IndexSearch { message: String, retryable: bool },

    /// The language model call failed, possibly after partial output.
    #[error("generation error: {0}")]
    Generation(String),

    /// A vector does not match the dimension fixed at index creation.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The fixed prompt parts (instructions + query) alone exceed the budget.
    #[error("prompt needs {estimated} tokens but the budget is {budget}")]
    PromptTooLarge { estimated: usize, budget: usize },

    /// Document bytes could not be turned into text.
    #[error("extraction error: {0}")]
    Extraction(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn embedding(msg: impl Into<String>, retryable: bool) -> Self {
        Self::EmbeddingService {
            message: msg.into(),
            retryable,
        }
    }

    pub fn index_write(failed_keys: Vec<String>, msg: impl Into<String>, retryable: bool) -> Self {
        Self::IndexWrite {
            failed_keys,
            message: msg.into(),
            retryable,
        }
    }

    pub fn index_search(msg: impl Into<String>, retryable: bool) -> Self {
        Self::IndexSearch {
            message: msg.into(),
            retryable,
        }
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Whether an orchestrator may retry the failed call with backoff.
    ///
    /// Generation errors are never retryable here: a stream that already
    /// delivered fragments must not be replayed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::EmbeddingService { retryable, .. }
            | Error::IndexWrite { retryable, .. }
            | Error::IndexSearch { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// Pipeline stage at which a query turn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Embed,
    Search,
    Assemble,
    Generate,
}

impl std::fmt::Display for QueryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryStage::Embed => "embed",
            QueryStage::Search => "search",
            QueryStage::Assemble => "assemble",
            QueryStage::Generate => "generate",
        };
        f.write_str(name)
    }
}

/// A failed conversation turn: the stage that failed and why.
#[derive(Debug, Error)]
#[error("query failed during {stage}: {source}")]
pub struct QueryError {
    pub stage: QueryStage,
    #[source]
    pub source: Error,
}

impl QueryError {
    pub fn new(stage: QueryStage, source: Error) -> Self {
        Self { stage, source }
    }
}
