//! `ragline ingest` and `ragline delete`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ragline_core::Error;

use crate::app::App;
use crate::config::Config;
use crate::extract;
use crate::ingest::{self, FailurePolicy};
use crate::progress::ProgressMode;

/// Options from the command line that override `[ingest]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestOptions {
    pub fail_fast: bool,
    pub concurrency: Option<usize>,
}

/// Ingest `paths` and print a summary. Returns the number of failed documents.
pub async fn run_ingest(
    mut config: Config,
    paths: &[PathBuf],
    options: IngestOptions,
    progress: ProgressMode,
) -> Result<usize> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    apply_options(&mut config, options)?;

    let files = collect_files(paths)?;
    if files.is_empty() {
        println!("ingest");
        println!("  no documents found");
        return Ok(0);
    }

    let app = App::open(config).await?;
    let pipeline = app.ingestion()?;
    let reporter = progress.reporter();
    let report = pipeline.ingest_files(&files, reporter.as_ref()).await;

    println!("ingest");
    println!("  documents: {}", report.outcomes.len());
    println!("  done:      {}", report.done_count());
    println!("  failed:    {}", report.failed_count());
    println!("  entries:   {}", report.total_entries());
    for outcome in report.failures() {
        let stage = outcome
            .failed_at
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        match &outcome.error {
            Some(e) => println!("  ✗ {} ({}): {}", outcome.document_id, stage, e),
            None => println!("  ✗ {} ({})", outcome.document_id, stage),
        }
    }
    let skipped = report
        .outcomes
        .iter()
        .filter(|o| o.state == ingest::IngestState::Pending)
        .count();
    if skipped > 0 {
        println!("  skipped:   {} (aborted after failure)", skipped);
    }

    Ok(report.failed_count())
}

fn apply_options(config: &mut Config, options: IngestOptions) -> Result<(), Error> {
    if options.fail_fast {
        config.ingest.on_failure = FailurePolicy::Abort;
    }
    if let Some(concurrency) = options.concurrency {
        if concurrency == 0 {
            return Err(Error::config("--concurrency must be >= 1"));
        }
        config.ingest.concurrency = concurrency;
    }
    Ok(())
}

/// Remove every entry of `document_id`.
pub async fn run_delete(config: Config, document_id: &str) -> Result<()> {
    let app = App::open(config).await?;
    let removed = app.index.delete(document_id).await?;
    if removed == 0 {
        println!("No entries for {}.", document_id);
    } else {
        println!("Deleted {} entries for {}.", removed, document_id);
    }
    Ok(())
}

/// Expand directories one level deep into the supported files they hold.
///
/// Explicit file arguments are kept whatever their extension, so an
/// unsupported file is reported as a failed document rather than skipped.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(supported_files_in(path)?);
        } else if path.exists() {
            files.push(path.clone());
        } else {
            bail!("No such file: {}", path.display());
        }
    }
    Ok(files)
}

fn supported_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && extract::content_type_for_path(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn directory_expansion_is_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.md"), "# b").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
        std::fs::write(tmp.path().join("image.png"), [0u8; 4]).unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();

        let files = collect_files(&[tmp.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
    }

    #[test]
    fn explicit_files_kept_regardless_of_extension() {
        let tmp = TempDir::new().unwrap();
        let png = tmp.path().join("image.png");
        std::fs::write(&png, [0u8; 4]).unwrap();
        assert_eq!(collect_files(&[png.clone()]).unwrap(), vec![png]);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = Config::default();
        let err = apply_options(
            &mut config,
            IngestOptions {
                fail_fast: false,
                concurrency: Some(0),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        apply_options(
            &mut config,
            IngestOptions {
                fail_fast: true,
                concurrency: Some(3),
            },
        )
        .unwrap();
        assert_eq!(config.ingest.concurrency, 3);
        assert_eq!(config.ingest.on_failure, FailurePolicy::Abort);
    }

    #[test]
    fn missing_path_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(collect_files(&[tmp.path().join("missing.pdf")]).is_err());
    }
}
