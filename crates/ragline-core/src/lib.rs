//! # ragline core
//!
//! Runtime-agnostic logic for ragline: data models, the error taxonomy,
//! chunking, the embedding and vector-index traits, prompt assembly, and
//! response generation.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Concrete providers and index backends live in the `ragline` app crate
//! and are passed in as trait objects.

pub mod assemble;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod models;

pub use error::{Error, QueryError, QueryStage, Result};
