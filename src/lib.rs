//! # ragline
//!
//! Retrieval-augmented question answering over your own documents.
//!
//! ragline extracts text from PDF, plain-text, and Markdown files, splits it
//! into overlapping chunks, embeds each chunk, and stores the vectors in a
//! pluggable index. Questions are embedded the same way; the closest chunks
//! are assembled into a token-budgeted prompt and a language model streams
//! back an answer grounded on them.
//!
//! The provider-independent pieces (chunking, the embedding and index
//! traits, prompt assembly, response generation) live in `ragline-core`.
//! This crate supplies the concrete providers and backends, the two
//! pipelines, and the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Documents  │──▶│  Ingestion   │──▶│ Vector index │
//! │ PDF/TXT/MD  │   │ Chunk+Embed  │   │ mem/sqlite/  │
//! └─────────────┘   └──────────────┘   │  pinecone    │
//!                                      └──────┬───────┘
//!                                             │ top-k
//!                   ┌──────────────┐   ┌──────▼───────┐
//!   question ──────▶│    Query     │──▶│   Assemble   │──▶ LLM ──▶ answer
//!   + history       │ embed+search │   │ under budget │   (streamed)
//!                   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragline ingest handbook.pdf policies/
//! ragline search "meal allowance"
//! ragline ask "What is the daily meal allowance?"
//! ragline chat
//! ragline stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`app`] | Component wiring from configuration |
//! | [`extract`] | Text extraction from PDF and text files |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, hash, local) |
//! | [`llm`] | Language model providers and SSE decoding |
//! | [`index`] | SQLite and Pinecone index backends |
//! | [`ingest`] | Ingestion pipeline with per-document states |
//! | [`query`] | Query pipeline for conversational turns |
//! | [`retry`] | Exponential backoff for transient failures |
//! | [`progress`] | Ingestion progress reporting |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | SQLite schema |

pub mod app;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod index;
pub mod ingest;
pub mod ingest_cmd;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod query;
pub mod retry;
pub mod search;
pub mod stats;
