//! Embedding provider trait, batching embedder, and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the [`Embedder`] that splits work into provider-sized batches,
//! plus pure helper functions for vector serialization and similarity
//! computation.
//!
//! Concrete provider implementations (OpenAI, Ollama, hashing, fastembed)
//! live in the `ragline` app crate.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Trait for embedding providers.
///
/// `embed_batch` is a single provider call; it never sees more than
/// [`max_batch_size`](EmbeddingProvider::max_batch_size) texts when driven
/// through an [`Embedder`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1024`).
    fn dims(&self) -> usize;
    /// Largest number of texts the provider accepts per call.
    fn max_batch_size(&self) -> usize {
        usize::MAX
    }
    /// Embed one batch, returning one vector per text in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Order-preserving, batching front end over an [`EmbeddingProvider`].
///
/// Either every requested vector is returned or the whole call fails;
/// a short or malformed provider response is never passed through.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl Embedder {
    /// # Errors
    ///
    /// [`Error::Config`] if `batch_size` is zero.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be > 0"));
        }
        Ok(Self {
            provider,
            batch_size,
        })
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Effective batch size: the configured size capped by the provider limit.
    pub fn batch_size(&self) -> usize {
        self.batch_size.min(self.provider.max_batch_size()).max(1)
    }

    /// Embed `texts`, one vector per text, in input order.
    ///
    /// An empty input returns an empty list without calling the provider.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let dims = self.provider.dims();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size()) {
            let embedded = self.provider.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(Error::embedding(
                    format!(
                        "provider returned {} vectors for {} texts",
                        embedded.len(),
                        batch.len()
                    ),
                    false,
                ));
            }
            for v in &embedded {
                if v.len() != dims {
                    return Err(Error::DimensionMismatch {
                        expected: dims,
                        actual: v.len(),
                    });
                }
            }
            vectors.extend(embedded);
        }

        Ok(vectors)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("empty embedding response", false))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use ragline_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Encodes each text as `[len, first byte, call number]` and records batch sizes.
    struct RecordingProvider {
        max_batch: usize,
        batches: Mutex<Vec<usize>>,
    }

    impl RecordingProvider {
        fn new(max_batch: usize) -> Self {
            Self {
                max_batch,
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn dims(&self) -> usize {
            3
        }
        fn max_batch_size(&self) -> usize {
            self.max_batch
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut batches = self.batches.lock().unwrap();
            batches.push(texts.len());
            let call = batches.len() as f32;
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.as_bytes()[0] as f32, call])
                .collect())
        }
    }

    struct ShortProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![0.0, 1.0]).collect())
        }
    }

    struct WrongDimsProvider;

    #[async_trait]
    impl EmbeddingProvider for WrongDimsProvider {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_order_preserved_across_batches() {
        let provider = Arc::new(RecordingProvider::new(100));
        let embedder = Embedder::new(provider.clone(), 2).unwrap();
        let input = texts(&["a", "bb", "ccc", "dddd", "eeeee"]);
        let vectors = embedder.embed(&input).await.unwrap();

        assert_eq!(vectors.len(), 5);
        for (text, v) in input.iter().zip(&vectors) {
            assert_eq!(v[0], text.len() as f32);
            assert_eq!(v[1], text.as_bytes()[0] as f32);
        }
        assert_eq!(*provider.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_provider_limit_caps_batch_size() {
        let provider = Arc::new(RecordingProvider::new(3));
        let embedder = Embedder::new(provider.clone(), 64).unwrap();
        assert_eq!(embedder.batch_size(), 3);
        let input = texts(&["a", "b", "c", "d", "e", "f", "g"]);
        embedder.embed(&input).await.unwrap();
        assert_eq!(*provider.batches.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_empty_input_skips_provider() {
        let provider = Arc::new(RecordingProvider::new(10));
        let embedder = Embedder::new(provider.clone(), 4).unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
        assert!(provider.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_response_fails_whole_call() {
        let embedder = Embedder::new(Arc::new(ShortProvider), 8).unwrap();
        let err = embedder.embed(&texts(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingService { .. }));
    }

    #[tokio::test]
    async fn test_wrong_dims_is_mismatch() {
        let embedder = Embedder::new(Arc::new(WrongDimsProvider), 8).unwrap();
        let err = embedder.embed_query("x").await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = Embedder::new(Arc::new(ShortProvider), 0);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
