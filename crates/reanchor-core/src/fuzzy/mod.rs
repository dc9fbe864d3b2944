//! Multi-tier fuzzy matcher for re-anchoring text spans after an edit.
//!
//! A [`FuzzyMatcher`] is an ordered list of [`MatchStrategy`] tiers. Each
//! tier either accepts a position (at or above its own confidence floor) or
//! passes. The first accepting tier wins; later tiers never override it.
//!
//! # Tiers
//!
//! | Tier | Needs | Confidence | Default floor |
//! |------|-------|------------|---------------|
//! | [`ExactTier`] | nothing | `1.0` | n/a |
//! | [`ContextTier`] | before/after context | `1 − d/len` | 0.85 |
//! | [`ChunkBoundedTier`] | original chunk index | `1 − d/len` | 0.75 |
//! | [`TrigramTier`] | nothing | Jaccard × penalty | 0.60 |
//!
//! Tiers are cheapest and most trusted first. A new tier can be inserted
//! anywhere with [`FuzzyMatcher::with_strategies`].
//!
//! # Example
//!
//! ```rust
//! use reanchor_core::fuzzy::{FuzzyMatcher, Haystack, MatchRequest};
//! use reanchor_core::models::MatchMethod;
//! use reanchor_core::thresholds::RecoveryThresholds;
//!
//! let matcher = FuzzyMatcher::new(&RecoveryThresholds::default());
//! let haystack = Haystack::new("Intro. The quick brown fox. Outro.");
//! let m = matcher
//!     .find(&MatchRequest::new("The quick brown fox", &haystack))
//!     .unwrap();
//! assert_eq!(m.method, MatchMethod::Exact);
//! assert_eq!((m.start, m.end), (7, 26));
//! ```

pub mod distance;
pub mod normalize;
mod tiers;

pub use tiers::{ChunkBoundedTier, ContextTier, ExactTier, TrigramTier};

use crate::models::{MatchMethod, TextContext};
use crate::thresholds::RecoveryThresholds;

/// The text being searched, pre-decoded into characters once so that every
/// request against the same version shares the work.
#[derive(Debug, Clone)]
pub struct Haystack<'a> {
    text: &'a str,
    chars: Vec<char>,
    /// Byte offset of each char, for translating `str::find` results.
    byte_offsets: Vec<usize>,
}

impl<'a> Haystack<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut byte_offsets = Vec::with_capacity(text.len());
        for (b, c) in text.char_indices() {
            chars.push(c);
            byte_offsets.push(b);
        }
        Self {
            text,
            chars,
            byte_offsets,
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Char offset of a byte offset that lies on a char boundary.
    pub fn char_offset(&self, byte: usize) -> usize {
        self.byte_offsets
            .binary_search(&byte)
            .unwrap_or_else(|insert_at| insert_at)
    }

    /// Every literal occurrence of `needle`, as char offsets of its start.
    pub fn find_all(&self, needle: &str) -> Vec<usize> {
        if needle.is_empty() {
            return Vec::new();
        }
        self.text
            .match_indices(needle)
            .map(|(b, _)| self.char_offset(b))
            .collect()
    }

    /// Slice by char offsets, clamped to the text.
    pub fn slice(&self, start: usize, end: usize) -> String {
        let end = end.min(self.chars.len());
        let start = start.min(end);
        self.chars[start..end].iter().collect()
    }
}

/// Character span of one chunk of the version being searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

/// One re-anchoring request.
#[derive(Debug, Clone)]
pub struct MatchRequest<'a> {
    /// The text originally annotated.
    pub needle: &'a str,
    pub haystack: &'a Haystack<'a>,
    pub context: Option<&'a TextContext>,
    /// Index of the chunk the span started in, if known.
    pub chunk_index: Option<usize>,
    /// Chunk spans of the searched version, in order.
    pub chunks: &'a [ChunkSpan],
    /// Where the span used to start; breaks ties between repeated
    /// occurrences in favor of the closest one.
    pub hint_start: Option<usize>,
}

impl<'a> MatchRequest<'a> {
    pub fn new(needle: &'a str, haystack: &'a Haystack<'a>) -> Self {
        Self {
            needle,
            haystack,
            context: None,
            chunk_index: None,
            chunks: &[],
            hint_start: None,
        }
    }

    pub fn with_context(mut self, context: Option<&'a TextContext>) -> Self {
        self.context = context;
        self
    }

    pub fn with_chunks(mut self, chunk_index: Option<usize>, chunks: &'a [ChunkSpan]) -> Self {
        self.chunk_index = chunk_index;
        self.chunks = chunks;
        self
    }

    pub fn with_hint(mut self, hint_start: Option<usize>) -> Self {
        self.hint_start = hint_start;
        self
    }

    pub(crate) fn needle_chars(&self) -> Vec<char> {
        self.needle.chars().collect()
    }
}

/// A proposed new position for a span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
    pub method: MatchMethod,
}

/// One tier of the matcher.
pub trait MatchStrategy: Send + Sync {
    /// Tag recorded on matches this tier accepts.
    fn method(&self) -> MatchMethod;

    /// Try to place the needle. Return `None` to pass to the next tier;
    /// only return a result that meets this tier's own floor.
    fn attempt(&self, req: &MatchRequest<'_>) -> Option<MatchResult>;
}

/// Ordered, short-circuiting chain of [`MatchStrategy`] tiers.
pub struct FuzzyMatcher {
    strategies: Vec<Box<dyn MatchStrategy>>,
}

impl FuzzyMatcher {
    /// The standard four-tier chain configured from `thresholds`.
    pub fn new(thresholds: &RecoveryThresholds) -> Self {
        Self::with_strategies(vec![
            Box::new(ExactTier),
            Box::new(ContextTier::new(thresholds.context_floor)),
            Box::new(ChunkBoundedTier::new(
                thresholds.chunk_bounded_floor,
                thresholds.chunk_neighborhood,
            )),
            Box::new(TrigramTier::new(
                thresholds.trigram_floor,
                thresholds.trigram_penalty,
            )),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn MatchStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn tiers(&self) -> impl Iterator<Item = MatchMethod> + '_ {
        self.strategies.iter().map(|s| s.method())
    }

    /// Run the tiers in order and return the first accepted match.
    pub fn find(&self, req: &MatchRequest<'_>) -> Option<MatchResult> {
        if req.needle.is_empty() || req.haystack.is_empty() {
            return None;
        }
        for strategy in &self.strategies {
            if let Some(found) = strategy.attempt(req) {
                tracing::debug!(
                    method = %found.method,
                    start = found.start,
                    end = found.end,
                    confidence = found.confidence,
                    "fuzzy match accepted"
                );
                return Some(found);
            }
        }
        None
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(&RecoveryThresholds::default())
    }
}

#[cfg(test)]
mod tests;
