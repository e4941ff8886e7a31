//! Fixed-window text chunker
//!
//! Splits text into windows of at most `size` characters where each window
//! starts `overlap` characters before the previous one ended. Lengths are
//! counted in `char`s, so multi-byte text never splits inside a code point.

mod hashing;

pub use hashing::*;

use crate::config::IngestConfig;
use crate::error::{Error, Result};

/// Resolved chunking parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub size: usize,
    pub overlap: usize,
    pub max_chunks: usize,
}

impl ChunkParams {
    /// Apply defaults and guardrails to caller-supplied values.
    ///
    /// Missing or zero size falls back to the default, values above the hard
    /// maxima are clamped, and an overlap that would not advance the window is
    /// replaced by a quarter of the size. Negative values are rejected.
    pub fn resolve(size: Option<i64>, overlap: Option<i64>, config: &IngestConfig) -> Result<Self> {
        let size = match size {
            Some(s) if s < 0 => {
                return Err(Error::validation(format!(
                    "chunk_size must not be negative (got {})",
                    s
                )))
            }
            Some(0) | None => config.chunk_size,
            Some(s) => s as usize,
        }
        .min(config.max_chunk_size)
        .max(1);

        let overlap = match overlap {
            Some(o) if o < 0 => {
                return Err(Error::validation(format!(
                    "chunk_overlap must not be negative (got {})",
                    o
                )))
            }
            None => config.chunk_overlap,
            Some(o) => o as usize,
        }
        .min(config.max_chunk_overlap);

        let overlap = if overlap >= size { size / 4 } else { overlap };

        Ok(Self {
            size,
            overlap,
            max_chunks: config.max_chunks_per_doc,
        })
    }
}

/// Split `text` into overlapping windows.
///
/// Adjacent chunks share exactly `overlap` characters; the output holds at
/// most `max_chunks` entries and the tail past that is dropped.
pub fn chunk_text(text: &str, size: usize, overlap: usize, max_chunks: usize) -> Vec<String> {
    if text.is_empty() || size == 0 || max_chunks == 0 {
        return Vec::new();
    }

    let overlap = if overlap >= size { size / 4 } else { overlap };

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(len);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());

        if end == len || chunks.len() == max_chunks {
            break;
        }
        start = end - overlap;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(chunk);
            } else {
                out.extend(chunk.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_text("", 10, 2, 100).is_empty());
    }

    #[test]
    fn test_short_input_single_chunk() {
        let chunks = chunk_text("hello", 10, 2, 100);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn test_forty_seven_chars() {
        let text: String = ('a'..='z').chain('A'..='U').collect();
        assert_eq!(text.chars().count(), 47);

        let chunks = chunk_text(&text, 10, 2, 5000);
        assert_eq!(chunks.len(), 6);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 2).collect();
            let head: String = pair[1].chars().take(2).collect();
            assert_eq!(tail, head);
        }
        assert_eq!(reassemble(&chunks, 2), text);
    }

    #[test]
    fn test_reconstruction_across_sizes() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        for (size, overlap) in [(1, 0), (7, 3), (50, 10), (100, 0), (1000, 999)] {
            let chunks = chunk_text(&text, size, overlap, 5000);
            let effective = if overlap >= size { size / 4 } else { overlap };
            assert_eq!(reassemble(&chunks, effective), text, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn test_multibyte_characters() {
        let text = "héllo wörld ünïcödé";
        let chunks = chunk_text(text, 5, 1, 100);
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
        assert_eq!(reassemble(&chunks, 1), text);
    }

    #[test]
    fn test_max_chunks_truncates_tail() {
        let text = "x".repeat(1000);
        let chunks = chunk_text(&text, 10, 0, 5);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks.concat(), "x".repeat(50));
    }

    #[test]
    fn test_params_defaults_and_guardrails() {
        let config = IngestConfig::default();

        let params = ChunkParams::resolve(None, None, &config).unwrap();
        assert_eq!((params.size, params.overlap), (1200, 150));
        assert_eq!(params.max_chunks, 5000);

        let params = ChunkParams::resolve(Some(100_000), Some(100_000), &config).unwrap();
        assert_eq!((params.size, params.overlap), (8000, 2000));

        let params = ChunkParams::resolve(Some(100), Some(100), &config).unwrap();
        assert_eq!((params.size, params.overlap), (100, 25));

        let params = ChunkParams::resolve(Some(10), Some(0), &config).unwrap();
        assert_eq!((params.size, params.overlap), (10, 0));

        assert!(ChunkParams::resolve(Some(-1), None, &config).is_err());
        assert!(ChunkParams::resolve(None, Some(-5), &config).is_err());
    }
}
