//! `ragline search`: retrieval without generation.
//!
//! Embeds the query, runs the index's top-k search, and prints the ranked
//! chunks with their scores. Useful for checking what `ask` would ground
//! its answer on.

use anyhow::Result;
use ragline_core::models::ScoredChunk;
use ragline_core::Error;
use serde::Serialize;

use crate::app::App;
use crate::config::Config;

const EXCERPT_CHARS: usize = 240;

/// One ranked result as printed (or emitted as JSON).
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub score: f32,
    pub document_id: String,
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub excerpt: String,
}

impl SearchResult {
    fn from_scored(rank: usize, scored: &ScoredChunk) -> Self {
        Self {
            rank,
            score: scored.score,
            document_id: scored.chunk.document_id.clone(),
            chunk_index: scored.chunk.index,
            page: scored.chunk.page,
            excerpt: excerpt(&scored.chunk.text, EXCERPT_CHARS),
        }
    }
}

pub async fn run_search(
    mut config: Config,
    query: &str,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    apply_top_k(&mut config, k)?;
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let app = App::open(config).await?;
    let pipeline = app.query()?;
    let retrieved = pipeline.retrieve(query).await?;
    let results: Vec<SearchResult> = retrieved
        .iter()
        .enumerate()
        .map(|(i, scored)| SearchResult::from_scored(i + 1, scored))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &results {
        println!(
            "{}. [{:.3}] {} / chunk {}",
            result.rank, result.score, result.document_id, result.chunk_index
        );
        if let Some(page) = result.page {
            println!("    page: {}", page);
        }
        println!("    excerpt: \"{}\"", result.excerpt);
        println!();
    }
    Ok(())
}

fn apply_top_k(config: &mut Config, k: Option<usize>) -> Result<(), Error> {
    match k {
        Some(0) => Err(Error::config("--k must be >= 1")),
        Some(k) => {
            config.retrieval.top_k = k;
            Ok(())
        }
        None => Ok(()),
    }
}

/// First `max_chars` characters of `text` on one line.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_core::models::Chunk;

    #[test]
    fn excerpt_flattens_whitespace() {
        assert_eq!(excerpt("a\n\n  b\tc", 100), "a b c");
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("ééééé", 3), "ééé…");
    }

    #[test]
    fn zero_k_rejected() {
        let mut config = Config::default();
        assert!(matches!(apply_top_k(&mut config, Some(0)), Err(Error::Config(_))));
        apply_top_k(&mut config, Some(7)).unwrap();
        assert_eq!(config.retrieval.top_k, 7);
        apply_top_k(&mut config, None).unwrap();
        assert_eq!(config.retrieval.top_k, 7);
    }

    #[test]
    fn result_carries_chunk_position() {
        let scored = ScoredChunk {
            chunk: Chunk {
                document_id: "policy.pdf".to_string(),
                index: 2,
                text: "meal allowance".to_string(),
                overlap: 0,
                page: Some(3),
                hash: String::new(),
            },
            score: 0.5,
        };
        let result = SearchResult::from_scored(1, &scored);
        assert_eq!(result.document_id, "policy.pdf");
        assert_eq!(result.chunk_index, 2);
        assert_eq!(result.page, Some(3));
    }
}
