//! Sliding-window text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters,
//! advancing by `chunk_size - overlap` characters per step so neighbouring
//! chunks share exactly `overlap` characters. Windows are measured in
//! Unicode scalar values, never bytes, so multi-byte text is never cut
//! inside a character.
//!
//! # Algorithm
//!
//! 1. Reject `overlap >= chunk_size` (and `chunk_size == 0`).
//! 2. Blank text yields no chunks.
//! 3. Slide a window of `chunk_size` characters from position 0.
//! 4. Stop once a window reaches the end of the text; the final chunk may
//!    be shorter than `chunk_size` and is never padded.
//! 5. Record the 1-based page each chunk starts on when the text carries
//!    form-feed page breaks (as PDF extraction produces).
//!
//! # Example
//!
//! ```rust
//! use ragline_core::chunk::split;
//!
//! let chunks = split("doc", "abcdefghij", 4, 1).unwrap();
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Page separator emitted by PDF text extraction.
pub const PAGE_BREAK: char = '\u{c}';

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// # Errors
    ///
    /// [`Error::Config`] unless `0 <= overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::config("chunk_size must be > 0"));
        }
        if overlap >= chunk_size {
            return Err(Error::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into ordered chunks owned by `document_id`.
    ///
    /// Deterministic: identical input always yields an identical sequence.
    pub fn split(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Byte offset of every char, plus the end of the string.
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let char_count = offsets.len();
        offsets.push(text.len());

        let paginated = text.contains(PAGE_BREAK);
        let step = self.chunk_size - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut page = 1u32;
        let mut page_cursor = 0usize;

        loop {
            let end = (start + self.chunk_size).min(char_count);
            let piece = &text[offsets[start]..offsets[end]];

            let chunk_page = if paginated {
                page += count_page_breaks(&text[offsets[page_cursor]..offsets[start]]);
                page_cursor = start;
                Some(page)
            } else {
                None
            };

            let index = chunks.len();
            chunks.push(make_chunk(
                document_id,
                index,
                piece,
                if index == 0 { 0 } else { self.overlap },
                chunk_page,
            ));

            if end == char_count {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// Split `text` with the given parameters.
///
/// Shorthand for [`Chunker::new`] followed by [`Chunker::split`].
pub fn split(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    Ok(Chunker::new(chunk_size, overlap)?.split(document_id, text))
}

fn count_page_breaks(s: &str) -> u32 {
    s.chars().filter(|c| *c == PAGE_BREAK).count() as u32
}

fn make_chunk(
    document_id: &str,
    index: usize,
    text: &str,
    overlap: usize,
    page: Option<u32>,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        document_id: document_id.to_string(),
        index,
        text: text.to_string(),
        overlap,
        page,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(split("doc1", "", 1000, 200).unwrap().is_empty());
        assert!(split("doc1", "  \n\t ", 1000, 200).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split("doc1", "Hello, world!", 1000, 200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].page, None);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        assert!(matches!(split("d", "text", 100, 100), Err(Error::Config(_))));
        assert!(matches!(split("d", "text", 100, 150), Err(Error::Config(_))));
        assert!(matches!(split("d", "text", 0, 0), Err(Error::Config(_))));
        assert!(split("d", "text", 100, 0).is_ok());
    }

    #[test]
    fn test_neighbours_overlap_exactly() {
        let text = sample_text(3500);
        let chunks = split("doc1", &text, 1000, 200).unwrap();
        // starts at 0, 800, 1600, 2400, 3200; the last window reaches the end.
        assert_eq!(chunks.len(), 5);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            let tail: String = prev[prev.len() - 200..].iter().collect();
            let head: String = next[..200].iter().collect();
            assert_eq!(tail, head);
            assert_eq!(pair[1].overlap, 200);
        }
        for c in &chunks[..chunks.len() - 1] {
            assert_eq!(c.text.chars().count(), 1000);
        }
        assert_eq!(chunks[4].text.chars().count(), 300);
    }

    #[test]
    fn test_final_chunk_shorter_not_padded() {
        let chunks = split("doc1", "abcdefghij", 4, 1).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);

        let chunks = split("doc1", "abcdefghijk", 4, 1).unwrap();
        assert_eq!(chunks.last().unwrap().text, "jk");
    }

    #[test]
    fn test_indices_contiguous() {
        let text = sample_text(10_000);
        let chunks = split("doc1", &text, 300, 50).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
            assert_eq!(c.document_id, "doc1");
        }
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text(5000);
        let c1 = split("doc1", &text, 1000, 200).unwrap();
        let c2 = split("doc1", &text, 1000, 200).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ héllo wörld ✓    │\n└──────────────────┘";
        let chunks = split("doc1", text, 7, 2).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks[..chunks.len() - 1] {
            assert_eq!(c.text.chars().count(), 7);
        }
    }

    #[test]
    fn test_pages_from_form_feeds() {
        let text = format!("{}\u{c}{}\u{c}{}", "a".repeat(10), "b".repeat(10), "c".repeat(10));
        let chunks = split("doc1", &text, 10, 0).unwrap();
        let pages: Vec<Option<u32>> = chunks.iter().map(|c| c.page).collect();
        // chunk starts: 0 (a), 10 (\f + b…), 20 (b + \f…), 30 (c)
        assert_eq!(pages, vec![Some(1), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_hash_tracks_text() {
        let chunks = split("doc1", "abcdabcd", 4, 0).unwrap();
        assert_eq!(chunks[0].hash, chunks[1].hash);
        let other = split("doc1", "abce", 4, 0).unwrap();
        assert_ne!(chunks[0].hash, other[0].hash);
    }
}
