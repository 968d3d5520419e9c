//! Vector index backends and backend selection.
//!
//! | `index.backend` | Implementation |
//! |-----------------|----------------|
//! | `"memory"` | [`InMemoryIndex`] (process lifetime only) |
//! | `"sqlite"` | [`sqlite::SqliteIndex`] |
//! | `"pinecone"` | [`pinecone::PineconeIndex`] |

pub mod pinecone;
pub mod sqlite;

use std::sync::Arc;

use anyhow::{bail, Result};
use ragline_core::index::memory::InMemoryIndex;
use ragline_core::index::VectorIndex;

use crate::config::Config;

/// Open the configured backend for vectors of `dims` dimensions.
pub async fn open_index(config: &Config, dims: usize) -> Result<Arc<dyn VectorIndex>> {
    let metric = config.metric()?;
    match config.index.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryIndex::new(dims, metric))),
        "sqlite" => Ok(Arc::new(
            sqlite::SqliteIndex::open(&config.index.path, dims, metric).await?,
        )),
        "pinecone" => Ok(Arc::new(pinecone::PineconeIndex::new(
            &config.index,
            dims,
            metric,
        )?)),
        other => bail!("Unknown index backend: {}", other),
    }
}
