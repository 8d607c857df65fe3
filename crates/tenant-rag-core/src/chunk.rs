//! Paragraph-boundary document splitter.
//!
//! Splits parsed document text into [`Chunk`]s whose estimated token count
//! never exceeds a configured `max_tokens`. Splitting prefers paragraph
//! boundaries (`\n\n`) so each chunk stays semantically coherent, and only
//! falls back to sentence, whitespace, and finally character boundaries for
//! paragraphs that are too large on their own.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries and trim each paragraph.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`, then flush the buffer as a chunk.
//! 4. A paragraph longer than `max_chars` is emitted as several chunks, cut
//!    at the last sentence end in the window, else the last whitespace,
//!    else a hard character boundary.
//! 5. Chunks shorter than `min_chunk_chars` are dropped and at most
//!    `max_chunks` are kept. Indices are contiguous after filtering.
//!
//! Empty (or whitespace-only) text yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use tenant_rag_core::chunk::{split_text, SplitOptions};
//!
//! let chunks = split_text("doc-123", "Hello world.\n\nSecond paragraph.", &SplitOptions::new(700));
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Metadata, CHUNK_INDEX_KEY, DOCUMENT_ID_KEY};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Size limits applied by [`split_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOptions {
    /// Maximum estimated tokens per chunk. Values below 1 are treated as 1.
    pub max_tokens: usize,
    /// Chunks whose trimmed text is shorter than this many chars are dropped.
    pub min_chunk_chars: usize,
    /// Upper bound on the number of chunks produced for one document.
    pub max_chunks: usize,
}

impl SplitOptions {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            min_chunk_chars: 5,
            max_chunks: 10_000,
        }
    }
}

/// Estimated token count of `text` (`ceil(chars / 4)`).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Result of [`split_document`].
#[derive(Debug, Clone)]
pub struct Split {
    pub chunks: Vec<Chunk>,
    /// Chunks cut off by `max_chunks`.
    pub truncated: usize,
}

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
///
/// # Guarantees
///
/// - Same `text` and `opts` always produce identical chunks, ids included.
/// - `estimate_tokens(chunk.text) <= opts.max_tokens` for every chunk.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Empty text produces an empty vector.
pub fn split_text(document_id: &str, text: &str, opts: &SplitOptions) -> Vec<Chunk> {
    split_document(document_id, text, opts).chunks
}

/// Like [`split_text`], also reporting how many chunks `max_chunks` dropped.
pub fn split_document(document_id: &str, text: &str, opts: &SplitOptions) -> Split {
    let max_chars = opts.max_tokens.max(1) * CHARS_PER_TOKEN;

    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();
    let mut current_chars = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_chars = trimmed.chars().count();

        let would_be = if current_buf.is_empty() {
            para_chars
        } else {
            current_chars + 2 + para_chars
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
            current_chars = 0;
        }

        if para_chars > max_chars {
            pieces.extend(split_oversized(trimmed, max_chars));
            continue;
        }

        if !current_buf.is_empty() {
            current_buf.push_str("\n\n");
            current_chars += 2;
        }
        current_buf.push_str(trimmed);
        current_chars += para_chars;
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces.retain(|p| p.trim().chars().count() >= opts.min_chunk_chars);
    let truncated = pieces.len().saturating_sub(opts.max_chunks);

    let chunks = pieces
        .into_iter()
        .take(opts.max_chunks)
        .enumerate()
        .map(|(i, p)| make_chunk(document_id, i as i64, &p))
        .collect();
    Split { chunks, truncated }
}

/// Cut a single paragraph longer than `max_chars` into pieces of at most
/// `max_chars` characters each.
fn split_oversized(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = paragraph;

    while !remaining.is_empty() {
        let limit = match remaining.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                out.push(remaining.to_string());
                break;
            }
        };
        let window = &remaining[..limit];
        let floor = window.len() / 2;

        let sentence_cut = window
            .rfind(['.', '!', '?', '\n'])
            .filter(|&pos| pos >= floor)
            .map(|pos| pos + 1);
        let space_cut = || {
            window
                .char_indices()
                .rev()
                .find(|(pos, c)| *pos > 0 && c.is_whitespace())
                .map(|(pos, c)| pos + c.len_utf8())
        };
        let cut = sentence_cut.or_else(space_cut).unwrap_or(limit);

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }

    out
}

/// Create a single [`Chunk`] with a deterministic id and SHA-256 content hash.
fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    );

    let mut metadata = Metadata::new();
    metadata.insert(DOCUMENT_ID_KEY.to_string(), document_id.to_string());
    metadata.insert(CHUNK_INDEX_KEY.to_string(), index.to_string());

    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(max_tokens: usize) -> SplitOptions {
        SplitOptions::new(max_tokens)
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("doc1", "Hello, world!", &opts(700));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(split_text("doc1", "", &opts(700)).is_empty());
        assert!(split_text("doc1", "  \n\n \t\n\n", &opts(700)).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split_text("doc1", text, &opts(700));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_paragraphs_exceeding_limit_split_on_boundaries() {
        // max_tokens=6 => max_chars=24
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = split_text("doc1", text, &opts(6));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "This is paragraph one.",
                "This is paragraph two.",
                "This is paragraph three."
            ]
        );
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_text("doc1", &text, &opts(10));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.metadata.get(CHUNK_INDEX_KEY), Some(&i.to_string()));
        }
    }

    #[test]
    fn test_every_chunk_within_size_bound() {
        let long_para = "word ".repeat(400);
        let no_spaces = "x".repeat(333);
        let text = format!(
            "Short intro.\n\n{}\n\nA. B. C. {}\n\n┌──────────────────┐ │ Hello │ └──┘",
            long_para, no_spaces
        );
        for max_tokens in [1, 2, 3, 7, 16, 50, 128] {
            let mut o = opts(max_tokens);
            o.min_chunk_chars = 0;
            let chunks = split_text("doc1", &text, &o);
            assert!(!chunks.is_empty());
            for c in &chunks {
                assert!(
                    estimate_tokens(&c.text) <= max_tokens,
                    "chunk of {} tokens exceeds {}",
                    estimate_tokens(&c.text),
                    max_tokens
                );
            }
        }
    }

    #[test]
    fn test_oversized_paragraph_prefers_sentence_boundary() {
        let text = "The first sentence is here. The second sentence follows it. The third one ends.";
        // max_chars = 48
        let chunks = split_text("doc1", text, &opts(12));
        assert_eq!(chunks[0].text, "The first sentence is here.");
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 48));
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = split_text("doc1", text, &opts(3));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().count() <= 12);
        }
    }

    #[test]
    fn test_short_chunks_dropped() {
        let mut o = opts(2);
        o.min_chunk_chars = 5;
        let chunks = split_text("doc1", "ok\n\nlonger\n\nhi", &o);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["longer"]);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_max_chunks_cap() {
        let text = (0..20)
            .map(|i| format!("Paragraph {:02} text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut o = opts(5);
        o.max_chunks = 3;
        let chunks = split_text("doc1", &text, &o);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chunk_index, 2);
    }

    #[test]
    fn test_split_document_counts_truncated_chunks() {
        let text = (0..20)
            .map(|i| format!("Paragraph {:02} text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut o = opts(5);
        let all = split_document("doc1", &text, &o);
        assert_eq!(all.truncated, 0);

        o.max_chunks = 3;
        let capped = split_document("doc1", &text, &o);
        assert_eq!(capped.chunks.len(), 3);
        assert_eq!(capped.truncated, all.chunks.len() - 3);
        assert_eq!(capped.chunks[..], all.chunks[..3]);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha paragraph\n\nBeta paragraph\n\nGamma paragraph\n\nDelta paragraph";
        let c1 = split_text("doc1", text, &opts(5));
        let c2 = split_text("doc1", text, &opts(5));
        assert_eq!(c1, c2);
        assert!(c1.len() > 1);
    }

    #[test]
    fn test_ids_depend_on_document_and_index() {
        let a = split_text("doc-a", "Same text body.", &opts(100));
        let b = split_text("doc-b", "Same text body.", &opts(100));
        assert_ne!(a[0].id, b[0].id);
        assert_eq!(a[0].hash, b[0].hash);
        assert_eq!(a[0].metadata.get(DOCUMENT_ID_KEY).map(String::as_str), Some("doc-a"));
    }
}
