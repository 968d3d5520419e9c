//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines every storage operation the ingestion
//! and query pipelines need, enabling pluggable backends (in-memory,
//! SQLite, remote vector databases).
//!
//! Implementations must be `Send + Sync` and must let `search` run
//! concurrently with `upsert`/`delete`: a single search observes either the
//! state before or after a write, never a mix of both.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{IndexEntry, RetrievedContext};

/// Similarity metric, fixed when an index is created.
///
/// Scores are only assumed to satisfy "higher is more similar".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    #[serde(rename = "dotproduct")]
    DotProduct,
}

impl Metric {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "cosine" => Ok(Metric::Cosine),
            "dotproduct" => Ok(Metric::DotProduct),
            other => Err(Error::config(format!(
                "Unsupported distance metric: '{}'. Must be cosine or dotproduct.",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::DotProduct => "dotproduct",
        }
    }

    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::DotProduct => a.iter().zip(b.iter()).map(|(x, y)| x * y).sum(),
        }
    }
}

/// Abstract vector index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace entries by key |
/// | [`search`](VectorIndex::search) | Top-k similarity search |
/// | [`delete`](VectorIndex::delete) | Remove every entry of a document |
/// | [`replace_document`](VectorIndex::replace_document) | Delete + upsert for one document |
/// | [`count`](VectorIndex::count) | Number of stored entries |
/// | [`document_ids`](VectorIndex::document_ids) | Documents with at least one entry |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension every stored and queried vector must have.
    fn dims(&self) -> usize;

    fn metric(&self) -> Metric;

    /// Insert entries, replacing any existing entry with the same key.
    ///
    /// A partial write is reported as [`Error::IndexWrite`] listing the
    /// keys that were not written.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// The `k` entries most similar to `query`, best first.
    ///
    /// Ties keep insertion order. Fewer than `k` results are returned only
    /// when the index holds fewer than `k` entries.
    async fn search(&self, query: &[f32], k: usize) -> Result<RetrievedContext>;

    /// Remove all entries of `document_id`, returning how many were removed.
    async fn delete(&self, document_id: &str) -> Result<usize>;

    /// Replace everything stored for `document_id` with `entries`.
    ///
    /// The default implementation deletes then upserts; local backends
    /// override it so readers never see the document half-written.
    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        check_entries(self.dims(), entries)?;
        check_owner(document_id, entries)?;
        self.delete(document_id).await?;
        self.upsert(entries).await
    }

    async fn count(&self) -> Result<usize>;

    async fn document_ids(&self) -> Result<Vec<String>>;
}

/// Fail with [`Error::DimensionMismatch`] unless `vector` has `expected` dims.
pub fn check_dims(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Validate every entry's dimension before anything is written.
pub fn check_entries(expected: usize, entries: &[IndexEntry]) -> Result<()> {
    entries
        .iter()
        .try_for_each(|e| check_dims(expected, &e.vector))
}

/// Reject `k == 0`.
pub fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(Error::config("search k must be a positive integer"));
    }
    Ok(())
}

/// Every entry passed to `replace_document` must belong to that document.
pub fn check_owner(document_id: &str, entries: &[IndexEntry]) -> Result<()> {
    let foreign: Vec<String> = entries
        .iter()
        .filter(|e| e.document_id() != document_id)
        .map(|e| e.key.clone())
        .collect();
    if !foreign.is_empty() {
        return Err(Error::index_write(
            foreign,
            format!("entries do not belong to document '{}'", document_id),
            false,
        ));
    }
    Ok(())
}
