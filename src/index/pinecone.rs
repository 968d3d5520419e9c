//! Pinecone-backed [`VectorIndex`] over the data-plane REST API.
//!
//! Chunk text and position travel as vector metadata so search results can
//! be turned back into chunks without a second store. Upserts are sent in
//! batches of `index.upsert_batch_size`; when a batch fails, every key from
//! that batch onward is reported as not written. Earlier batches stay
//! written, which is harmless because keys are deterministic and the next
//! attempt overwrites them.
//!
//! Deletion lists vector ids by the `{document_id}#` prefix and deletes them
//! by id, which works on serverless indexes where metadata-filtered deletes
//! are unavailable.

use std::collections::HashSet;
use std::future::Future;

use async_trait::async_trait;
use ragline_core::index::{check_dims, check_entries, check_k, check_owner, Metric, VectorIndex};
use ragline_core::models::{Chunk, IndexEntry, RetrievedContext, ScoredChunk};
use ragline_core::{Error, Result};
use tracing::debug;

use crate::config::IndexConfig;
use crate::http;

const API_VERSION: &str = "2024-07";
const LIST_PAGE_SIZE: usize = 100;
const DELETE_BATCH_SIZE: usize = 1000;

pub struct PineconeIndex {
    client: reqwest::Client,
    api_key: String,
    host: String,
    namespace: String,
    batch_size: usize,
    dims: usize,
    metric: Metric,
}

impl PineconeIndex {
    /// Requires `index.url` (the index host) and `PINECONE_API_KEY`.
    pub fn new(config: &IndexConfig, dims: usize, metric: Metric) -> Result<Self> {
        let host = config
            .url
            .clone()
            .ok_or_else(|| Error::config("index.url required for pinecone backend"))?;
        let api_key = std::env::var("PINECONE_API_KEY")
            .map_err(|_| Error::config("PINECONE_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key,
            host: host.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            batch_size: config.upsert_batch_size.max(1),
            dims,
            metric,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    /// Send one request; failures become search-side errors.
    async fn call(
        &self,
        what: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value> {
        let response = request.send().await.map_err(|e| {
            Error::index_search(http::describe_transport("Pinecone", what, &e), true)
        })?;
        if !response.status().is_success() {
            let (message, retryable) = http::describe_failure("Pinecone", response).await;
            return Err(Error::index_search(message, retryable));
        }
        response
            .json()
            .await
            .map_err(|e| Error::index_search(format!("Invalid Pinecone response: {}", e), true))
    }

    async fn upsert_batch(&self, batch: &[IndexEntry]) -> std::result::Result<(), (String, bool)> {
        let vectors: Vec<serde_json::Value> = batch.iter().map(vector_record).collect();
        let body = serde_json::json!({
            "vectors": vectors,
            "namespace": self.namespace,
        });

        let response = self
            .post("/vectors/upsert")
            .json(&body)
            .send()
            .await
            .map_err(|e| (http::describe_transport("Pinecone", "/vectors/upsert", &e), true))?;
        if !response.status().is_success() {
            return Err(http::describe_failure("Pinecone", response).await);
        }
        Ok(())
    }

    /// Every vector id starting with `prefix`, following pagination.
    async fn list_ids(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("namespace", self.namespace.clone()),
                ("limit", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(p) = prefix {
                query.push(("prefix", p.to_string()));
            }
            if let Some(t) = &token {
                query.push(("paginationToken", t.clone()));
            }

            let request = self
                .client
                .get(format!("{}/vectors/list", self.host))
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .query(&query);
            let json = self.call("/vectors/list", request).await?;
            let (page, next) = parse_list(&json)?;
            ids.extend(page);
            match next {
                Some(t) => token = Some(t),
                None => return Ok(ids),
            }
        }
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<()> {
        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            let body = serde_json::json!({
                "ids": batch,
                "namespace": self.namespace,
            });
            self.call("/vectors/delete", self.post("/vectors/delete").json(&body))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        check_entries(self.dims, entries)?;
        write_in_batches(entries, self.batch_size, |batch| self.upsert_batch(batch)).await
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<RetrievedContext> {
        check_k(k)?;
        check_dims(self.dims, query)?;

        let body = serde_json::json!({
            "vector": query,
            "topK": k,
            "includeMetadata": true,
            "includeValues": false,
            "namespace": self.namespace,
        });
        let json = self.call("/query", self.post("/query").json(&body)).await?;
        parse_matches(&json)
    }

    async fn delete(&self, document_id: &str) -> Result<usize> {
        let ids = self.list_ids(Some(&key_prefix(document_id))).await?;
        let ids: Vec<String> = ids
            .into_iter()
            .filter(|id| key_document_id(id) == Some(document_id))
            .collect();
        self.delete_ids(&ids).await?;
        Ok(ids.len())
    }

    /// Upsert the new version, then remove keys it no longer has.
    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        check_entries(self.dims, entries)?;
        check_owner(document_id, entries)?;

        let existing = self.list_ids(Some(&key_prefix(document_id))).await?;
        self.upsert(entries).await?;

        let keep: HashSet<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        let stale: Vec<String> = existing
            .into_iter()
            .filter(|id| key_document_id(id) == Some(document_id) && !keep.contains(id.as_str()))
            .collect();
        self.delete_ids(&stale).await
    }

    async fn count(&self) -> Result<usize> {
        let body = serde_json::json!({});
        let json = self
            .call(
                "/describe_index_stats",
                self.post("/describe_index_stats").json(&body),
            )
            .await?;
        Ok(json
            .pointer(&format!("/namespaces/{}/vectorCount", self.namespace))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize)
    }

    async fn document_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .list_ids(None)
            .await?
            .iter()
            .filter_map(|id| key_document_id(id).map(str::to_string))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

fn key_prefix(document_id: &str) -> String {
    format!("{}#", document_id)
}

/// Document part of a `{document_id}#{index}` key.
fn key_document_id(key: &str) -> Option<&str> {
    let (doc, index) = key.rsplit_once('#')?;
    index.parse::<usize>().ok().map(|_| doc)
}

/// Pinecone rejects null metadata values, so `page` is omitted when unknown.
fn vector_record(entry: &IndexEntry) -> serde_json::Value {
    let chunk = &entry.chunk;
    let mut metadata = serde_json::json!({
        "document_id": chunk.document_id,
        "chunk_index": chunk.index,
        "text": chunk.text,
        "overlap": chunk.overlap,
        "hash": chunk.hash,
    });
    if let Some(page) = chunk.page {
        metadata["page"] = serde_json::json!(page);
    }
    serde_json::json!({
        "id": entry.key,
        "values": entry.vector,
        "metadata": metadata,
    })
}

fn parse_matches(json: &serde_json::Value) -> Result<RetrievedContext> {
    let matches = json
        .get("matches")
        .and_then(|m| m.as_array())
        .ok_or_else(|| Error::index_search("Invalid Pinecone response: missing matches", false))?;

    matches
        .iter()
        .map(|m| {
            let invalid = || Error::index_search("Invalid Pinecone match: missing fields", false);
            let metadata = m.get("metadata").ok_or_else(invalid)?;
            let text = metadata.get("text").and_then(|v| v.as_str()).ok_or_else(invalid)?;
            let document_id = metadata
                .get("document_id")
                .and_then(|v| v.as_str())
                .ok_or_else(invalid)?;
            let index = metadata
                .get("chunk_index")
                .and_then(|v| v.as_u64())
                .ok_or_else(invalid)?;
            let score = m.get("score").and_then(|v| v.as_f64()).ok_or_else(invalid)?;

            Ok(ScoredChunk {
                chunk: Chunk {
                    document_id: document_id.to_string(),
                    index: index as usize,
                    text: text.to_string(),
                    overlap: metadata.get("overlap").and_then(|v| v.as_u64()).unwrap_or(0)
                        as usize,
                    page: metadata
                        .get("page")
                        .and_then(|v| v.as_u64())
                        .map(|p| p as u32),
                    hash: metadata
                        .get("hash")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                },
                score: score as f32,
            })
        })
        .collect()
}

/// Send `entries` through `write` in batches of `batch_size`, stopping at
/// the first failed batch. The keys of that batch and every later one are
/// reported as failed.
async fn write_in_batches<'a, F, Fut>(
    entries: &'a [IndexEntry],
    batch_size: usize,
    mut write: F,
) -> Result<()>
where
    F: FnMut(&'a [IndexEntry]) -> Fut,
    Fut: Future<Output = std::result::Result<(), (String, bool)>>,
{
    let batch_size = batch_size.max(1);
    for (batch_no, batch) in entries.chunks(batch_size).enumerate() {
        if let Err((message, retryable)) = write(batch).await {
            let failed_keys: Vec<String> = entries[batch_no * batch_size..]
                .iter()
                .map(|e| e.key.clone())
                .collect();
            return Err(Error::index_write(failed_keys, message, retryable));
        }
        debug!(batch = batch_no, size = batch.len(), "pinecone upsert batch written");
    }
    Ok(())
}

fn parse_list(json: &serde_json::Value) -> Result<(Vec<String>, Option<String>)> {
    let vectors = json
        .get("vectors")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::index_search("Invalid Pinecone response: missing vectors", false))?;
    let ids = vectors
        .iter()
        .filter_map(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
        .collect();
    let next = json
        .pointer("/pagination/next")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    Ok((ids, next))
}
