//! In-memory [`VectorIndex`] implementation for testing and small corpora.
//!
//! Entries live in a `HashMap` behind a single `std::sync::RwLock`, so a
//! search holds one read guard for its whole scan and always sees a
//! consistent snapshot. Writes validate everything first and then apply
//! under one write guard, which makes each upsert (and each document
//! replacement) all-or-nothing. Search is brute-force over all vectors.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{IndexEntry, RetrievedContext, ScoredChunk};

use super::{check_dims, check_entries, check_k, check_owner, Metric, VectorIndex};

struct StoredEntry {
    entry: IndexEntry,
    /// Insertion sequence; kept when an entry is overwritten by key.
    seq: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, StoredEntry>,
    next_seq: u64,
}

impl State {
    fn insert(&mut self, entry: &IndexEntry) {
        match self.entries.get_mut(&entry.key) {
            Some(existing) => existing.entry = entry.clone(),
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(
                    entry.key.clone(),
                    StoredEntry {
                        entry: entry.clone(),
                        seq,
                    },
                );
            }
        }
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, stored| stored.entry.document_id() != document_id);
        before - self.entries.len()
    }
}

/// In-memory vector index.
pub struct InMemoryIndex {
    dims: usize,
    metric: Metric,
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new(dims: usize, metric: Metric) -> Self {
        Self {
            dims,
            metric,
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::index_search("in-memory index lock poisoned", false))
    }

    fn write(&self, keys: impl FnOnce() -> Vec<String>) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::index_write(keys(), "in-memory index lock poisoned", false))
    }
}

fn entry_keys(entries: &[IndexEntry]) -> Vec<String> {
    entries.iter().map(|e| e.key.clone()).collect()
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        check_entries(self.dims, entries)?;
        let mut state = self.write(|| entry_keys(entries))?;
        for entry in entries {
            state.insert(entry);
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<RetrievedContext> {
        check_k(k)?;
        check_dims(self.dims, query)?;

        let state = self.read()?;
        let mut scored: Vec<(f32, u64, &IndexEntry)> = state
            .entries
            .values()
            .map(|stored| {
                (
                    self.metric.similarity(query, &stored.entry.vector),
                    stored.seq,
                    &stored.entry,
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, _, entry)| ScoredChunk {
                chunk: entry.chunk.clone(),
                score,
            })
            .collect())
    }

    async fn delete(&self, document_id: &str) -> Result<usize> {
        let mut state = self.write(Vec::new)?;
        Ok(state.remove_document(document_id))
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        check_entries(self.dims, entries)?;
        check_owner(document_id, entries)?;
        let mut state = self.write(|| entry_keys(entries))?;
        state.remove_document(document_id);
        for entry in entries {
            state.insert(entry);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    async fn document_ids(&self) -> Result<Vec<String>> {
        let state = self.read()?;
        let ids: BTreeSet<String> = state
            .entries
            .values()
            .map(|s| s.entry.document_id().to_string())
            .collect();
        Ok(ids.into_iter().collect())
    }
}
