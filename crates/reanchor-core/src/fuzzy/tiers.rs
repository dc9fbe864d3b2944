//! The four built-in matcher tiers.

use super::distance::{approximate_find, distance_confidence};
use super::normalize::{jaccard, normalize_text, trigrams};
use super::{MatchRequest, MatchResult, MatchStrategy};
use crate::models::{char_len, MatchMethod};

/// Candidate closest to `target`, or the first one without a target.
fn closest(candidates: &[usize], target: Option<usize>) -> Option<usize> {
    match target {
        Some(t) => candidates.iter().copied().min_by_key(|c| c.abs_diff(t)),
        None => candidates.first().copied(),
    }
}

/// Run the edit-distance search inside `[start, end)` of the haystack and
/// translate the result back to haystack offsets.
fn search_window(
    req: &MatchRequest<'_>,
    needle: &[char],
    start: usize,
    end: usize,
    floor: f64,
    method: MatchMethod,
) -> Option<MatchResult> {
    let hay = req.haystack.chars();
    let end = end.min(hay.len());
    if start >= end {
        return None;
    }
    let found = approximate_find(needle, &hay[start..end])?;
    let confidence = distance_confidence(found.distance, needle.len());
    if confidence < floor || found.start == found.end {
        return None;
    }
    Some(MatchResult {
        start: start + found.start,
        end: start + found.end,
        confidence,
        method,
    })
}

/// Literal substring search.
pub struct ExactTier;

impl MatchStrategy for ExactTier {
    fn method(&self) -> MatchMethod {
        MatchMethod::Exact
    }

    fn attempt(&self, req: &MatchRequest<'_>) -> Option<MatchResult> {
        let occurrences = req.haystack.find_all(req.needle);
        let start = closest(&occurrences, req.hint_start)?;
        Some(MatchResult {
            start,
            end: start + char_len(req.needle),
            confidence: 1.0,
            method: MatchMethod::Exact,
        })
    }
}

/// Locate the recorded before/after strings, then search the narrow gap
/// between them.
pub struct ContextTier {
    floor: f64,
}

impl ContextTier {
    pub fn new(floor: f64) -> Self {
        Self { floor }
    }
}

impl MatchStrategy for ContextTier {
    fn method(&self) -> MatchMethod {
        MatchMethod::Context
    }

    fn attempt(&self, req: &MatchRequest<'_>) -> Option<MatchResult> {
        let ctx = req.context?;
        if ctx.before.is_empty() && ctx.after.is_empty() {
            return None;
        }
        let needle = req.needle_chars();
        let m = needle.len();
        let slack = (m / 4).max(16);
        let before_len = char_len(&ctx.before);

        let before_end = if ctx.before.is_empty() {
            None
        } else {
            let expected = req.hint_start.map(|h| h.saturating_sub(before_len));
            closest(&req.haystack.find_all(&ctx.before), expected).map(|s| s + before_len)
        };

        let after_start = if ctx.after.is_empty() {
            None
        } else {
            let occurrences = req.haystack.find_all(&ctx.after);
            match before_end {
                Some(b) => occurrences.into_iter().find(|&a| a >= b),
                None => {
                    let expected = req.hint_start.map(|h| h + m);
                    closest(&occurrences, expected)
                }
            }
        };

        let (start, end) = match (before_end, after_start) {
            (Some(b), Some(a)) if a - b <= m + 2 * slack => (b, a),
            (Some(b), _) => (b, b + m + slack),
            (None, Some(a)) => (a.saturating_sub(m + slack), a),
            (None, None) => return None,
        };

        search_window(req, &needle, start, end, self.floor, MatchMethod::Context)
    }
}

/// Edit-distance search restricted to the chunks around the span's
/// original chunk index.
pub struct ChunkBoundedTier {
    floor: f64,
    neighborhood: usize,
}

impl ChunkBoundedTier {
    pub fn new(floor: f64, neighborhood: usize) -> Self {
        Self {
            floor,
            neighborhood,
        }
    }
}

impl MatchStrategy for ChunkBoundedTier {
    fn method(&self) -> MatchMethod {
        MatchMethod::ChunkBounded
    }

    fn attempt(&self, req: &MatchRequest<'_>) -> Option<MatchResult> {
        let index = req.chunk_index?;
        let last = req.chunks.len().checked_sub(1)?;
        let index = index.min(last);
        let lo = index.saturating_sub(self.neighborhood);
        let hi = (index + self.neighborhood).min(last);
        let start = req.chunks[lo].start;
        let end = req.chunks[hi].end;

        let needle = req.needle_chars();
        search_window(
            req,
            &needle,
            start,
            end,
            self.floor,
            MatchMethod::ChunkBounded,
        )
    }
}

/// Last resort: slide a needle-sized window over the whole text and score
/// trigram overlap. Not edit-distance based, so the raw score is discounted.
pub struct TrigramTier {
    floor: f64,
    penalty: f64,
}

impl TrigramTier {
    pub fn new(floor: f64, penalty: f64) -> Self {
        Self { floor, penalty }
    }

    fn score_at(
        &self,
        req: &MatchRequest<'_>,
        needle_grams: &std::collections::HashSet<[char; 3]>,
        start: usize,
        len: usize,
    ) -> f64 {
        let window = req.haystack.slice(start, start + len);
        jaccard(needle_grams, &trigrams(&normalize_text(&window)))
    }
}

impl MatchStrategy for TrigramTier {
    fn method(&self) -> MatchMethod {
        MatchMethod::Trigram
    }

    fn attempt(&self, req: &MatchRequest<'_>) -> Option<MatchResult> {
        let needle_grams = trigrams(&normalize_text(req.needle));
        if needle_grams.is_empty() {
            return None;
        }
        let n = req.haystack.len();
        let m = char_len(req.needle).min(n);
        let last_start = n - m;
        let step = (m / 8).max(1);

        let better = |score: f64, start: usize, best: Option<(f64, usize)>| match best {
            None => true,
            Some((best_score, best_start)) => {
                score > best_score
                    || (score == best_score
                        && req
                            .hint_start
                            .is_some_and(|h| start.abs_diff(h) < best_start.abs_diff(h)))
            }
        };

        let mut best: Option<(f64, usize)> = None;
        let mut coarse: Vec<usize> = (0..=last_start).step_by(step).collect();
        if coarse.last() != Some(&last_start) {
            coarse.push(last_start);
        }
        for start in coarse {
            let score = self.score_at(req, &needle_grams, start, m);
            if better(score, start, best) {
                best = Some((score, start));
            }
        }

        let (_, coarse_start) = best?;
        let lo = coarse_start.saturating_sub(step);
        let hi = (coarse_start + step).min(last_start);
        for start in lo..=hi {
            let score = self.score_at(req, &needle_grams, start, m);
            if better(score, start, best) {
                best = Some((score, start));
            }
        }

        let (score, start) = best?;
        let confidence = (score * self.penalty).clamp(0.0, 1.0);
        if confidence < self.floor {
            return None;
        }
        Some(MatchResult {
            start,
            end: start + m,
            confidence,
            method: MatchMethod::Trigram,
        })
    }
}
