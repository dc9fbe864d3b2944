//! Chunk derivation: the external engine seam and the offsets-only fallback.
//!
//! A [`DerivationEngine`] turns a full text version into ordered
//! [`DerivedChunk`]s, optionally with semantic metadata and embeddings. The
//! engine is a black box; the only thing this crate checks is that its
//! offsets describe the text it was given ([`validate_derived`]).
//!
//! When the engine fails, the pipeline substitutes a [`FallbackChunker`]:
//! paragraph-boundary splitting with no metadata and no embeddings.
//!
//! # Fallback algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries, trimming each paragraph.
//! 3. Grow a span over consecutive paragraphs until the next one would push
//!    it past `max_chars`, then flush.
//! 4. Hard-split an oversized paragraph at the last newline or space before
//!    the limit.
//! 5. Always return at least one chunk.
//!
//! Every chunk's `content` is the verbatim slice `text[start..end]` (char
//! offsets), separators included.
//!
//! ```rust
//! use reanchor_core::derive::FallbackChunker;
//!
//! let chunks = FallbackChunker::new(700).chunk("Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].start, chunks[0].end), (0, 31));
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::fuzzy::Haystack;
use crate::models::{char_slice, DerivedChunk};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Produces chunks (and optionally metadata and embeddings) for a text.
#[async_trait]
pub trait DerivationEngine: Send + Sync {
    /// Short label for logs and reports.
    fn name(&self) -> &str;

    /// Derive ordered chunks for `text`. Any error makes the caller fall
    /// back to offsets-only chunking.
    async fn derive(&self, text: &str) -> Result<Vec<DerivedChunk>>;
}

/// Check engine output against the text it was derived from.
///
/// Rejects an empty list, spans that are inverted or run past the end of
/// the text, and spans that start before the previous one ends. Chunk
/// lookups by offset assume ascending, disjoint spans. Content that disagrees with the text at its offsets is
/// replaced by the verbatim slice, since offsets are what annotations and
/// recovery rely on.
pub fn validate_derived(
    text: &str,
    mut chunks: Vec<DerivedChunk>,
) -> std::result::Result<Vec<DerivedChunk>, String> {
    if chunks.is_empty() {
        return Err("engine returned no chunks".to_string());
    }
    let len = text.chars().count();
    let mut prev_end = 0;
    for (i, c) in chunks.iter_mut().enumerate() {
        if c.start > c.end || c.end > len {
            return Err(format!(
                "chunk {} has span {}..{} outside text of {} chars",
                i, c.start, c.end, len
            ));
        }
        if c.start < prev_end {
            return Err(format!(
                "chunk {} span {}..{} overlaps or precedes the previous chunk ending at {}",
                i, c.start, c.end, prev_end
            ));
        }
        prev_end = c.end;
        let verbatim = char_slice(text, c.start, c.end);
        if c.content != verbatim {
            tracing::debug!(chunk = i, "engine content differs from text slice; using slice");
            c.content = verbatim.to_string();
        }
    }
    Ok(chunks)
}

/// Offsets-only paragraph chunker.
#[derive(Debug, Clone)]
pub struct FallbackChunker {
    max_tokens: usize,
}

impl FallbackChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
        }
    }

    /// Split `text` into chunks without metadata or embeddings.
    pub fn chunk(&self, text: &str) -> Vec<DerivedChunk> {
        chunk_spans(text, self.max_tokens * CHARS_PER_TOKEN)
            .into_iter()
            .map(|(start, end)| DerivedChunk {
                content: char_slice(text, start, end).to_string(),
                start,
                end,
                metadata: None,
                embedding: None,
            })
            .collect()
    }
}

#[async_trait]
impl DerivationEngine for FallbackChunker {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn derive(&self, text: &str) -> Result<Vec<DerivedChunk>> {
        Ok(self.chunk(text))
    }
}

/// Trim whitespace off both ends of `[start, end)`.
fn trim_span(chars: &[char], mut start: usize, mut end: usize) -> (usize, usize) {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    (start, end)
}

/// Char-offset spans of paragraph chunks no longer than `max_chars`.
fn chunk_spans(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let hay = Haystack::new(text);
    let chars = hay.chars();
    if chars.is_empty() {
        return vec![(0, 0)];
    }

    let mut paragraphs = Vec::new();
    let mut byte = 0;
    for para in text.split("\n\n") {
        let start = hay.char_offset(byte);
        let end = hay.char_offset(byte + para.len());
        let (s, e) = trim_span(chars, start, end);
        if s < e {
            paragraphs.push((s, e));
        }
        byte += para.len() + 2;
    }

    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for (ps, pe) in paragraphs {
        if let Some((cs, _)) = current {
            if pe - cs > max_chars {
                spans.extend(current.take());
            }
        }

        if pe - ps > max_chars {
            spans.extend(current.take());
            let mut rest = ps;
            while rest < pe {
                let limit = (rest + max_chars).min(pe);
                let split = if limit < pe {
                    let window = &chars[rest..limit];
                    window
                        .iter()
                        .rposition(|&c| c == '\n')
                        .or_else(|| window.iter().rposition(|&c| c == ' '))
                        .map(|pos| rest + pos + 1)
                        .unwrap_or(limit)
                } else {
                    limit
                };
                let (s, e) = trim_span(chars, rest, split);
                if s < e {
                    spans.push((s, e));
                }
                rest = split;
            }
        } else {
            current = Some(match current {
                Some((cs, _)) => (cs, pe),
                None => (ps, pe),
            });
        }
    }
    spans.extend(current);

    if spans.is_empty() {
        spans.push((0, chars.len()));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, max_tokens: usize) -> Vec<DerivedChunk> {
        FallbackChunker::new(max_tokens).chunk(text)
    }

    fn assert_verbatim(text: &str, chunks: &[DerivedChunk]) {
        for c in chunks {
            assert_eq!(c.content, char_slice(text, c.start, c.end));
            assert!(c.metadata.is_none() && c.embedding.is_none());
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk("Hello, world!", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk("", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 0));
    }

    #[test]
    fn test_paragraphs_merge_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk(text, 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
    }

    #[test]
    fn test_paragraphs_split_over_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk(text, 6);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].content, "This is paragraph two.");
        assert_verbatim(text, &chunks);
    }

    #[test]
    fn test_spans_are_ordered_and_disjoint() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk(&text, 10);
        for pair in chunks.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        assert_verbatim(&text, &chunks);
    }

    #[test]
    fn test_hard_split_on_space() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk(text, 3);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.end - c.start <= 12);
            assert!(!c.content.starts_with(' ') && !c.content.ends_with(' '));
        }
        assert_verbatim(text, &chunks);
    }

    #[test]
    fn test_multibyte_offsets_are_chars() {
        let text = "┌──────────────────┐\n\n│ Hello world      │";
        let chunks = chunk(text, 3);
        assert!(!chunks.is_empty());
        assert_verbatim(text, &chunks);
        assert_eq!(chunks[0].start, 0);
    }

    #[test]
    fn test_validate_rejects_bad_spans() {
        let text = "short";
        let bad = vec![DerivedChunk {
            content: "short".into(),
            start: 0,
            end: 9,
            metadata: None,
            embedding: None,
        }];
        assert!(validate_derived(text, bad).is_err());
        assert!(validate_derived(text, Vec::new()).is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_spans() {
        let text = "alpha beta gamma";
        let span = |start, end| DerivedChunk {
            content: char_slice(text, start, end).to_string(),
            start,
            end,
            metadata: None,
            embedding: None,
        };

        let swapped = vec![span(6, 16), span(0, 5)];
        let err = validate_derived(text, swapped).unwrap_err();
        assert!(err.contains("chunk 1"), "{}", err);

        let overlapping = vec![span(0, 10), span(6, 16)];
        assert!(validate_derived(text, overlapping).is_err());

        let adjacent = vec![span(0, 6), span(6, 16)];
        assert_eq!(validate_derived(text, adjacent).unwrap().len(), 2);
    }

    #[test]
    fn test_validate_reslices_content() {
        let text = "  padded  ";
        let chunks = vec![DerivedChunk {
            content: "padded".into(),
            start: 0,
            end: 10,
            metadata: None,
            embedding: None,
        }];
        let ok = validate_derived(text, chunks).unwrap();
        assert_eq!(ok[0].content, text);
    }
}
