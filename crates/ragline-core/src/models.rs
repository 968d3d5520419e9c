//! Core data models that flow through ingestion and retrieval.
//!
//! Documents are split into [`Chunk`]s, chunks are paired with vectors into
//! [`IndexEntry`]s, and searches return [`ScoredChunk`]s that ground a
//! conversation made of [`ConversationTurn`]s.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded document. Immutable once created; re-ingesting the same
/// `id` supersedes the previous version.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier, usually the file name.
    pub id: String,
    /// Raw bytes as uploaded.
    pub content: Vec<u8>,
    /// Where the bytes came from.
    pub source_path: PathBuf,
    /// MIME type used to pick a text extractor.
    pub content_type: String,
    pub received_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        content: Vec<u8>,
        source_path: impl Into<PathBuf>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content,
            source_path: source_path.into(),
            content_type: content_type.into(),
            received_at: Utc::now(),
        }
    }

    /// Convenience constructor for plain UTF-8 text.
    pub fn from_text(id: impl Into<String>, text: &str) -> Self {
        let id = id.into();
        Self::new(id.clone(), text.as_bytes().to_vec(), id, "text/plain")
    }
}

/// A contiguous span of one document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    /// Position within the document, contiguous from 0.
    pub index: usize,
    pub text: String,
    /// Characters shared with the previous chunk (0 for the first).
    pub overlap: usize,
    /// 1-based page on which the chunk starts, when pages are known.
    pub page: Option<u32>,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl Chunk {
    /// Index key: unique per document and sequence position, so
    /// re-ingestion overwrites instead of duplicating.
    pub fn key(&self) -> String {
        entry_key(&self.document_id, self.index)
    }
}

/// Build the index key for chunk `index` of `document_id`.
pub fn entry_key(document_id: &str, index: usize) -> String {
    format!("{}#{}", document_id, index)
}

/// A chunk, its vector, and the metadata persisted alongside them.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub key: String,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        let metadata = serde_json::json!({
            "document_id": chunk.document_id,
            "chunk_index": chunk.index,
            "page": chunk.page,
            "hash": chunk.hash,
        });
        Self {
            key: chunk.key(),
            chunk,
            vector,
            metadata,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.chunk.document_id
    }
}

/// A retrieved chunk and its similarity to the query (higher is closer).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Search results ranked by descending score.
pub type RetrievedContext = Vec<ScoredChunk>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Session-scoped conversation history, owned by the caller.
///
/// The pipelines only read a suffix of it. A turn is recorded as a full
/// user/assistant exchange after generation succeeds, so a failed turn
/// never leaves a dangling question or partial answer behind.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn record_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(ConversationTurn::user(question));
        self.turns.push(ConversationTurn::assistant(answer));
    }

    /// The most recent `max_turns` turns, oldest first.
    pub fn window(&self, max_turns: usize) -> &[ConversationTurn] {
        recent_turns(&self.turns, max_turns)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Suffix of `history` holding at most `max_turns` turns.
pub fn recent_turns(history: &[ConversationTurn], max_turns: usize) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(max_turns);
    &history[start..]
}
