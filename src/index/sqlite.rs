//! SQLite-backed [`VectorIndex`].
//!
//! Vectors are stored as little-endian f32 BLOBs and searched brute-force
//! in Rust. Every write runs in one transaction and the database is opened
//! in WAL mode, so a search reads either the state before a write or the
//! state after it. The dimension and metric are pinned in `index_meta` the
//! first time the index is opened; reopening with different values fails.

use std::cmp::Ordering;

use anyhow::Context;
use async_trait::async_trait;
use ragline_core::embedding::{blob_to_vec, vec_to_blob};
use ragline_core::index::{check_dims, check_entries, check_k, check_owner, Metric, VectorIndex};
use ragline_core::models::{Chunk, IndexEntry, RetrievedContext, ScoredChunk};
use ragline_core::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;

use crate::{db, migrate};

pub struct SqliteIndex {
    pool: SqlitePool,
    dims: usize,
    metric: Metric,
}

impl SqliteIndex {
    /// Open or create the index at `path`.
    pub async fn open(path: &Path, dims: usize, metric: Metric) -> anyhow::Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open index database: {}", path.display()))?;
        migrate::run_migrations(&pool).await?;

        let stored: Option<(i64, String)> =
            sqlx::query_as("SELECT dims, metric FROM index_meta WHERE id = 1")
                .fetch_optional(&pool)
                .await?;

        match stored {
            Some((stored_dims, stored_metric)) => {
                if stored_dims as usize != dims {
                    return Err(Error::DimensionMismatch {
                        expected: stored_dims as usize,
                        actual: dims,
                    })
                    .with_context(|| {
                        format!(
                            "index at {} was created with {} dims",
                            path.display(),
                            stored_dims
                        )
                    });
                }
                if stored_metric != metric.as_str() {
                    return Err(Error::config(format!(
                        "index at {} was created with metric '{}', config asks for '{}'",
                        path.display(),
                        stored_metric,
                        metric.as_str()
                    ))
                    .into());
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO index_meta (id, dims, metric, created_at) VALUES (1, ?, ?, ?)",
                )
                .bind(dims as i64)
                .bind(metric.as_str())
                .bind(chrono::Utc::now().timestamp())
                .execute(&pool)
                .await?;
            }
        }

        Ok(Self { pool, dims, metric })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn begin_write(&self, keys: &[String]) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| write_error(keys.to_vec(), &e))
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        check_entries(self.dims, entries)?;
        if entries.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        let mut tx = self.begin_write(&keys).await?;
        insert_entries(&mut tx, entries)
            .await
            .map_err(|e| write_error(keys.clone(), &e))?;
        tx.commit().await.map_err(|e| write_error(keys, &e))?;
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<RetrievedContext> {
        check_k(k)?;
        check_dims(self.dims, query)?;

        let rows = sqlx::query(
            r#"
            SELECT document_id, chunk_index, text, overlap, page, hash, embedding, seq
            FROM entries
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| search_error(&e))?;

        let mut scored: Vec<(ScoredChunk, i64)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = self.metric.similarity(query, &blob_to_vec(&blob));
                let seq: i64 = row.get("seq");
                (
                    ScoredChunk {
                        chunk: row_to_chunk(row),
                        score,
                    },
                    seq,
                )
            })
            .collect();

        scored.sort_by(|(a, a_seq), (b, b_seq)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a_seq.cmp(b_seq))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(chunk, _)| chunk).collect())
    }

    async fn delete(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM entries WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(Vec::new(), &e))?;
        Ok(result.rows_affected() as usize)
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        check_entries(self.dims, entries)?;
        check_owner(document_id, entries)?;

        let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        let mut tx = self.begin_write(&keys).await?;
        sqlx::query("DELETE FROM entries WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(keys.clone(), &e))?;
        insert_entries(&mut tx, entries)
            .await
            .map_err(|e| write_error(keys.clone(), &e))?;
        tx.commit().await.map_err(|e| write_error(keys, &e))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| search_error(&e))?;
        Ok(n as usize)
    }

    async fn document_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT document_id FROM entries ORDER BY document_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| search_error(&e))
    }
}

/// Insert or overwrite `entries`. An overwritten key keeps its original `seq`.
async fn insert_entries(
    tx: &mut Transaction<'static, Sqlite>,
    entries: &[IndexEntry],
) -> std::result::Result<(), sqlx::Error> {
    let base_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM entries")
        .fetch_one(&mut **tx)
        .await?;
    let now = chrono::Utc::now().timestamp();

    for (offset, entry) in entries.iter().enumerate() {
        let chunk = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO entries
                (key, document_id, chunk_index, text, overlap, page, hash, embedding, seq, metadata_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                text = excluded.text,
                overlap = excluded.overlap,
                page = excluded.page,
                hash = excluded.hash,
                embedding = excluded.embedding,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.key)
        .bind(&chunk.document_id)
        .bind(chunk.index as i64)
        .bind(&chunk.text)
        .bind(chunk.overlap as i64)
        .bind(chunk.page.map(i64::from))
        .bind(&chunk.hash)
        .bind(vec_to_blob(&entry.vector))
        .bind(base_seq + offset as i64 + 1)
        .bind(entry.metadata.to_string())
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let index: i64 = row.get("chunk_index");
    let overlap: i64 = row.get("overlap");
    let page: Option<i64> = row.get("page");
    Chunk {
        document_id: row.get("document_id"),
        index: index as usize,
        text: row.get("text"),
        overlap: overlap as usize,
        page: page.map(|p| p as u32),
        hash: row.get("hash"),
    }
}

/// Busy/locked databases and pool exhaustion clear up on their own.
fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}

fn write_error(keys: Vec<String>, e: &sqlx::Error) -> Error {
    Error::index_write(keys, format!("sqlite write failed: {}", e), is_transient(e))
}

fn search_error(e: &sqlx::Error) -> Error {
    Error::index_search(format!("sqlite query failed: {}", e), is_transient(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(doc: &str, index: usize, text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry::new(
            Chunk {
                document_id: doc.to_string(),
                index,
                text: text.to_string(),
                overlap: 0,
                page: Some(1),
                hash: format!("h-{}", text),
            },
            vector,
        )
    }

    async fn open(tmp: &TempDir) -> SqliteIndex {
        SqliteIndex::open(&tmp.path().join("index.sqlite"), 2, Metric::Cosine)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upsert_and_search_ranked() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index
            .upsert(&[
                entry("a", 0, "east", vec![1.0, 0.0]),
                entry("a", 1, "north", vec![0.0, 1.0]),
                entry("b", 0, "north-east", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let results = index.search(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.text, "east");
        assert_eq!(results[1].chunk.text, "north-east");
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].chunk.page, Some(1));
    }

    #[tokio::test]
    async fn ties_keep_insertion_order_across_overwrite() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index
            .upsert(&[entry("a", 0, "first", vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert(&[entry("b", 0, "second", vec![1.0, 0.0])])
            .await
            .unwrap();
        // Overwriting "a#0" must not move it behind "b#0".
        index
            .upsert(&[entry("a", 0, "first-v2", vec![2.0, 0.0])])
            .await
            .unwrap();

        let results = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].chunk.text, "first-v2");
        assert_eq!(results[1].chunk.text, "second");
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dimension_mismatch_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        let err = index
            .upsert(&[
                entry("a", 0, "ok", vec![1.0, 0.0]),
                entry("a", 1, "bad", vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.search(&[1.0], 1).await.is_err());
    }

    #[tokio::test]
    async fn replace_and_delete_document() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index
            .upsert(&[
                entry("a", 0, "old0", vec![1.0, 0.0]),
                entry("a", 1, "old1", vec![1.0, 0.0]),
                entry("a", 2, "old2", vec![1.0, 0.0]),
                entry("b", 0, "keep", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        index
            .replace_document("a", &[entry("a", 0, "new0", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 2);
        let results = index.search(&[1.0, 0.0], 5).await.unwrap();
        assert!(results.iter().all(|r| !r.chunk.text.starts_with("old")));

        assert!(index
            .replace_document("a", &[entry("b", 3, "foreign", vec![1.0, 0.0])])
            .await
            .is_err());

        assert_eq!(index.delete("a").await.unwrap(), 1);
        assert_eq!(index.delete("a").await.unwrap(), 0);
        assert_eq!(index.document_ids().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn delete_failure_is_a_write_error() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index.close().await;
        let err = index.delete("a").await.unwrap_err();
        assert!(matches!(err, Error::IndexWrite { .. }), "got {err:?}");
    }

    fn version(tag: &str, parts: usize) -> Vec<IndexEntry> {
        (0..parts)
            .map(|i| entry("doc", i, &format!("{} part {}", tag, i), vec![1.0, 0.0]))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn search_never_sees_half_replaced_document() {
        let tmp = TempDir::new().unwrap();
        let index = std::sync::Arc::new(open(&tmp).await);
        let v1 = version("v1", 3);
        let v2 = version("v2", 2);
        index.replace_document("doc", &v1).await.unwrap();

        let writer = {
            let index = index.clone();
            tokio::spawn(async move {
                for round in 0..50 {
                    let next = if round % 2 == 0 { &v2 } else { &v1 };
                    index.replace_document("doc", next).await.unwrap();
                }
            })
        };

        for _ in 0..50 {
            let results = index.search(&[1.0, 0.0], 10).await.unwrap();
            let tag = &results[0].chunk.text[..2];
            assert!(results.iter().all(|r| r.chunk.text.starts_with(tag)));
            let expected = if tag == "v1" { 3 } else { 2 };
            assert_eq!(results.len(), expected);
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn reopen_persists_and_pins_dims() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        {
            let index = SqliteIndex::open(&path, 2, Metric::Cosine).await.unwrap();
            index
                .upsert(&[entry("a", 0, "persisted", vec![1.0, 0.0])])
                .await
                .unwrap();
            index.close().await;
        }

        let index = SqliteIndex::open(&path, 2, Metric::Cosine).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        index.close().await;

        assert!(SqliteIndex::open(&path, 3, Metric::Cosine).await.is_err());
        assert!(SqliteIndex::open(&path, 2, Metric::DotProduct).await.is_err());
    }

    #[tokio::test]
    async fn zero_k_rejected() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        assert!(matches!(index.search(&[1.0, 0.0], 0).await, Err(Error::Config(_))));
    }
}
