//! Index statistics.
//!
//! A quick summary of what's indexed: entry count and the documents that
//! have entries. Used by `ragline stats` to confirm that ingestion and
//! deletes did what was expected.

use anyhow::Result;
use serde::Serialize;

use crate::app::App;
use crate::config::Config;

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub backend: String,
    pub metric: String,
    pub dims: usize,
    pub entries: usize,
    pub documents: Vec<String>,
}

pub async fn collect_stats(app: &App) -> Result<IndexStats> {
    let entries = app.index.count().await?;
    let mut documents = app.index.document_ids().await?;
    documents.sort();
    Ok(IndexStats {
        backend: app.config.index.backend.clone(),
        metric: app.index.metric().as_str().to_string(),
        dims: app.index.dims(),
        entries,
        documents,
    })
}

/// Run the stats command: query the index and print a summary.
pub async fn run_stats(config: Config, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let stats = collect_stats(&app).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("ragline index stats");
    println!("===================");
    println!();
    println!("  Backend:     {}", stats.backend);
    if stats.backend == "sqlite" {
        println!("  Path:        {}", app.config.index.path.display());
        let size = std::fs::metadata(&app.config.index.path)
            .map(|m| m.len())
            .unwrap_or(0);
        println!("  Size:        {}", format_bytes(size));
    }
    println!("  Metric:      {}", stats.metric);
    println!("  Dimensions:  {}", stats.dims);
    println!();
    println!("  Entries:     {}", stats.entries);
    println!("  Documents:   {}", stats.documents.len());

    if !stats.documents.is_empty() {
        println!();
        for id in &stats.documents {
            println!("    {}", id);
        }
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_core::models::{Chunk, IndexEntry};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1_572_864), "1.5 MB");
    }

    #[tokio::test]
    async fn stats_list_sorted_documents() {
        let config: Config = toml::from_str(
            "[embedding]\nprovider = \"hash\"\ndims = 2\n[index]\nbackend = \"memory\"\n",
        )
        .unwrap();
        let app = App::open(config).await.unwrap();
        let entry = |doc: &str| {
            IndexEntry::new(
                Chunk {
                    document_id: doc.to_string(),
                    index: 0,
                    text: "x".to_string(),
                    overlap: 0,
                    page: None,
                    hash: String::new(),
                },
                vec![1.0, 0.0],
            )
        };
        app.index
            .upsert(&[entry("b.txt"), entry("a.txt")])
            .await
            .unwrap();

        let stats = collect_stats(&app).await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.documents, vec!["a.txt", "b.txt"]);
        assert_eq!(stats.metric, "cosine");
    }
}
