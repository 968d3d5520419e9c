//! Ingestion pipeline orchestration.
//!
//! Drives each document through extraction and chunking, embedding, and
//! indexing:
//!
//! ```text
//! Pending → Chunking → Embedding → Indexing → Done
//!              └──────────┴───────────┴──────→ Failed
//! ```
//!
//! Failures are isolated per document: a failed document is reported with
//! the state it failed in and the originating error, and the batch moves on
//! (or stops starting new documents under [`FailurePolicy::Abort`]).
//! Re-ingesting a document id replaces its previous entries through
//! [`VectorIndex::replace_document`], so a failed re-ingestion leaves the
//! previous version searchable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use ragline_core::chunk::Chunker;
use ragline_core::embedding::Embedder;
use ragline_core::index::VectorIndex;
use ragline_core::models::{Document, IndexEntry};
use ragline_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::extract;
use crate::progress::{IngestProgressEvent, ProgressReporter};
use crate::retry::RetryPolicy;

/// Per-document ingestion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestState {
    Pending,
    Chunking,
    Embedding,
    Indexing,
    Done,
    Failed,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Pending => "pending",
            IngestState::Chunking => "chunking",
            IngestState::Embedding => "embedding",
            IngestState::Indexing => "indexing",
            IngestState::Done => "done",
            IngestState::Failed => "failed",
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with the rest of a batch after a document fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep processing the remaining documents.
    #[default]
    Continue,
    /// Start no further documents; unstarted ones stay `Pending`.
    Abort,
}

/// Final state of one document in a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub document_id: String,
    /// `Done`, `Failed`, or `Pending` when an aborted batch never started it.
    pub state: IngestState,
    /// State the document was in when it failed.
    pub failed_at: Option<IngestState>,
    /// Entries written to the index.
    pub entries: usize,
    pub error: Option<Error>,
}

impl DocumentOutcome {
    fn done(document_id: &str, entries: usize) -> Self {
        Self {
            document_id: document_id.to_string(),
            state: IngestState::Done,
            failed_at: None,
            entries,
            error: None,
        }
    }

    fn failed(document_id: &str, at: IngestState, error: Error) -> Self {
        Self {
            document_id: document_id.to_string(),
            state: IngestState::Failed,
            failed_at: Some(at),
            entries: 0,
            error: Some(error),
        }
    }

    fn not_started(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            state: IngestState::Pending,
            failed_at: None,
            entries: 0,
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == IngestState::Done
    }
}

/// Per-document outcomes of a batch, in submission order.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub outcomes: Vec<DocumentOutcome>,
}

impl IngestReport {
    pub fn done_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_done()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == IngestState::Failed)
            .count()
    }

    pub fn total_entries(&self) -> usize {
        self.outcomes.iter().map(|o| o.entries).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == IngestState::Failed)
    }
}

/// Chunker → Embedder → VectorIndex for batches of documents.
pub struct IngestionPipeline {
    chunker: Chunker,
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    retry: RetryPolicy,
    concurrency: usize,
    policy: FailurePolicy,
}

impl IngestionPipeline {
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] if the embedder and index disagree on
    /// vector size.
    pub fn new(chunker: Chunker, embedder: Embedder, index: Arc<dyn VectorIndex>) -> Result<Self> {
        if embedder.dims() != index.dims() {
            return Err(Error::DimensionMismatch {
                expected: index.dims(),
                actual: embedder.dims(),
            });
        }
        Ok(Self {
            chunker,
            embedder,
            index,
            retry: RetryPolicy::default(),
            concurrency: 1,
            policy: FailurePolicy::Continue,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Documents processed at once (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ingest a single document.
    pub async fn ingest_document(&self, document: &Document) -> DocumentOutcome {
        self.run_document(document, 1, 1, &crate::progress::NoProgress)
            .await
    }

    /// Ingest `documents`, returning one outcome per document in submission order.
    ///
    /// Up to `concurrency` documents are in flight at once. Intermediate
    /// transitions are reported as they happen; terminal states are
    /// reported in submission order.
    pub async fn ingest_batch(
        &self,
        documents: &[Document],
        reporter: &dyn ProgressReporter,
    ) -> IngestReport {
        let sources = documents.iter().map(Source::Loaded).collect();
        self.run_batch(sources, reporter).await
    }

    /// Like [`ingest_batch`](Self::ingest_batch), reading each file only when
    /// its turn comes.
    ///
    /// A file that cannot be read fails alone at the chunking stage, with the
    /// read error wrapped in [`Error::Extraction`].
    pub async fn ingest_files(
        &self,
        paths: &[PathBuf],
        reporter: &dyn ProgressReporter,
    ) -> IngestReport {
        let sources = paths.iter().map(|p| Source::File(p.as_path())).collect();
        self.run_batch(sources, reporter).await
    }

    async fn run_batch(
        &self,
        sources: Vec<Source<'_>>,
        reporter: &dyn ProgressReporter,
    ) -> IngestReport {
        let total = sources.len() as u64;
        reporter.report(IngestProgressEvent::Started { total });

        let aborted = AtomicBool::new(false);
        let aborted = &aborted;

        let mut results = futures::stream::iter(sources.into_iter().enumerate())
            .map(|(i, source)| async move {
                if aborted.load(Ordering::SeqCst) {
                    return DocumentOutcome::not_started(&source.document_id());
                }
                let position = i as u64 + 1;
                let outcome = match source {
                    Source::Loaded(document) => {
                        self.run_document(document, position, total, reporter)
                            .await
                    }
                    Source::File(path) => match load_document(path) {
                        Ok(document) => {
                            self.run_document(&document, position, total, reporter)
                                .await
                        }
                        Err(e) => fail(
                            &source.document_id(),
                            IngestState::Chunking,
                            Error::Extraction(format!("{:#}", e)),
                        ),
                    },
                };
                if outcome.state == IngestState::Failed && self.policy == FailurePolicy::Abort {
                    aborted.store(true, Ordering::SeqCst);
                }
                outcome
            })
            .buffered(self.concurrency);

        let mut report = IngestReport::default();
        let mut position = 0u64;
        while let Some(outcome) = results.next().await {
            position += 1;
            let detail = match (&outcome.state, &outcome.error) {
                (IngestState::Done, _) => Some(format!("{} entries", outcome.entries)),
                (IngestState::Failed, Some(e)) => Some(e.to_string()),
                _ => Some("not started".to_string()),
            };
            reporter.report(IngestProgressEvent::Transition {
                document_id: outcome.document_id.clone(),
                position,
                total,
                state: outcome.state,
                detail,
            });
            report.outcomes.push(outcome);
        }

        reporter.report(IngestProgressEvent::Finished {
            done: report.done_count() as u64,
            failed: report.failed_count() as u64,
            entries: report.total_entries() as u64,
        });
        report
    }

    async fn run_document(
        &self,
        document: &Document,
        position: u64,
        total: u64,
        reporter: &dyn ProgressReporter,
    ) -> DocumentOutcome {
        let id = document.id.as_str();
        let enter = |state: IngestState| {
            reporter.report(IngestProgressEvent::Transition {
                document_id: id.to_string(),
                position,
                total,
                state,
                detail: None,
            })
        };

        enter(IngestState::Chunking);
        let chunks = match extract::extract_text(&document.content, &document.content_type) {
            Ok(text) => self.chunker.split(id, &text),
            Err(e) => return fail(id, IngestState::Chunking, e),
        };

        if chunks.is_empty() {
            // An emptied document still supersedes its previous version.
            let index = &self.index;
            if let Err(e) = self
                .retry
                .run("replace", || index.replace_document(id, &[]))
                .await
            {
                return fail(id, IngestState::Indexing, e);
            }
            info!(document = id, "empty document, 0 entries");
            return DocumentOutcome::done(id, 0);
        }

        enter(IngestState::Embedding);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embedder = &self.embedder;
        let vectors = match self.retry.run("embed", || embedder.embed(&texts)).await {
            Ok(vectors) => vectors,
            Err(e) => return fail(id, IngestState::Embedding, e),
        };

        enter(IngestState::Indexing);
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::new(chunk, vector))
            .collect();
        let index = &self.index;
        if let Err(e) = self
            .retry
            .run("replace", || index.replace_document(id, &entries))
            .await
        {
            return fail(id, IngestState::Indexing, e);
        }

        info!(document = id, entries = entries.len(), "document indexed");
        DocumentOutcome::done(id, entries.len())
    }
}

/// One entry of a batch.
#[derive(Clone, Copy)]
enum Source<'a> {
    Loaded(&'a Document),
    File(&'a Path),
}

impl Source<'_> {
    fn document_id(&self) -> String {
        match self {
            Source::Loaded(document) => document.id.clone(),
            Source::File(path) => document_id_for_path(path),
        }
    }
}

fn document_id_for_path(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.display().to_string(),
    }
}

fn fail(document_id: &str, at: IngestState, error: Error) -> DocumentOutcome {
    warn!(document = document_id, state = %at, error = %error, "document failed");
    DocumentOutcome::failed(document_id, at, error)
}

/// Read a file into a [`Document`] identified by its file name.
///
/// Files with an unrecognised extension are still loaded; they fail at the
/// chunking stage so the rest of the batch is unaffected.
pub fn load_document(path: &Path) -> anyhow::Result<Document> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let content_type =
        extract::content_type_for_path(path).unwrap_or("application/octet-stream");
    Ok(Document::new(id, content, path, content_type))
}
