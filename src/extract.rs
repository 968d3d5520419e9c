//! Text extraction for uploaded documents.
//!
//! The ingestion pipeline hands over raw bytes plus a content type and gets
//! plain UTF-8 text back. PDF page boundaries are kept as form feeds
//! (`\u{c}`) so the chunker can attribute chunks to pages.

use std::path::Path;

use ragline_core::chunk::PAGE_BREAK;
use ragline_core::{Error, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Content type for a file path, decided by extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "txt" | "text" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// Extract plain text from `bytes`.
///
/// Fails with [`Error::Extraction`] for unsupported types, corrupt PDFs,
/// and text that is not valid UTF-8.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_TEXT | MIME_MARKDOWN => extract_utf8(bytes),
        other => Err(Error::Extraction(format!(
            "unsupported content-type: {}",
            other
        ))),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| Error::Extraction(format!("PDF extraction failed: {}", e)))?;
    let text = pages.join(&PAGE_BREAK.to_string());
    // Trailing page breaks would open an empty last page.
    Ok(text.trim_end_matches(PAGE_BREAK).to_string())
}

fn extract_utf8(bytes: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Extraction(format!("document is not valid UTF-8: {}", e)))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
}
