//! Annotation recovery: re-anchor every annotation onto a new text version.
//!
//! Recovery runs in two phases:
//!
//! 1. **Plan** (pure, parallel with the `parallel` feature): run the fuzzy
//!    matcher for each annotation against the new text and classify it.
//! 2. **Apply** (sequential): write each changed row through the store.
//!
//! | Confidence | Outcome | Row change |
//! |------------|---------|------------|
//! | ≥ recover floor (0.85) | recovered | quote, offsets, context, chunk ids rewritten |
//! | ≥ review floor (0.75) | needs review | suggested position attached, offsets kept |
//! | below, or no match | lost | confidence 0, offsets kept |

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{ReprocessError, Result};
use crate::fuzzy::{ChunkSpan, FuzzyMatcher, Haystack, MatchRequest};
use crate::models::{
    char_len, char_slice, Annotation, AnnotationRecovery, Chunk, MatchMethod, TextContext,
};
use crate::store::Store;
use crate::thresholds::RecoveryThresholds;
use crate::version::ReprocessSession;

/// Characters of surrounding text recorded as an annotation's context.
pub const CONTEXT_CHARS: usize = 32;

/// Text immediately around `[start, end)` of `text`.
pub fn capture_context(text: &str, start: usize, end: usize) -> TextContext {
    TextContext {
        before: char_slice(text, start.saturating_sub(CONTEXT_CHARS), start).to_string(),
        after: char_slice(text, end, end + CONTEXT_CHARS).to_string(),
    }
}

/// Index of the first chunk overlapping `[start, end)` and the ids of every
/// overlapping chunk. `chunks` must be in chunk-index order.
pub fn overlapping_chunks(
    chunks: &[Chunk],
    start: usize,
    end: usize,
) -> (Option<usize>, Vec<String>) {
    // A zero-width span still belongs to the chunk containing its offset.
    let end = end.max(start + 1);
    let mut first = None;
    let mut ids = Vec::new();
    for (i, c) in chunks.iter().enumerate() {
        if c.overlaps(start, end) {
            first.get_or_insert(i);
            ids.push(c.id.clone());
        }
    }
    (first, ids)
}

/// Build a new annotation over `[start, end)` of the document's current
/// text, capturing its quote, context, and chunk membership.
pub fn new_annotation(
    document_id: &str,
    text: &str,
    chunks: &[Chunk],
    start: usize,
    end: usize,
) -> std::result::Result<Annotation, String> {
    let len = char_len(text);
    if start >= end || end > len {
        return Err(format!(
            "span {}..{} is empty or outside text of {} chars",
            start, end, len
        ));
    }
    let (chunk_index, chunk_ids) = overlapping_chunks(chunks, start, end);
    Ok(Annotation {
        id: uuid::Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        quote: char_slice(text, start, end).to_string(),
        start_offset: start,
        end_offset: end,
        context: Some(capture_context(text, start, end)),
        chunk_index,
        chunk_ids,
        recovery: None,
    })
}

/// Bucket an annotation landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Recovered,
    NeedsReview,
    Lost,
}

impl RecoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recovered => "recovered",
            Self::NeedsReview => "needs_review",
            Self::Lost => "lost",
        }
    }
}

/// Per-annotation line of the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationOutcome {
    pub annotation_id: String,
    pub status: RecoveryStatus,
    pub method: Option<MatchMethod>,
    pub confidence: f64,
    /// New position (recovered) or suggested position (needs review).
    pub start: Option<usize>,
    pub end: Option<usize>,
    /// Why a lost annotation could not be placed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Totals from one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotationRecoveryReport {
    pub total: usize,
    pub recovered: usize,
    pub needs_review: usize,
    pub lost: usize,
    pub items: Vec<AnnotationOutcome>,
}

impl AnnotationRecoveryReport {
    /// `(recovered + needs_review) / total`, or `1.0` with nothing to recover.
    pub fn recovery_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.recovered + self.needs_review) as f64 / self.total as f64
        }
    }

    fn push(&mut self, outcome: AnnotationOutcome) {
        self.total += 1;
        match outcome.status {
            RecoveryStatus::Recovered => self.recovered += 1,
            RecoveryStatus::NeedsReview => self.needs_review += 1,
            RecoveryStatus::Lost => self.lost += 1,
        }
        self.items.push(outcome);
    }
}

/// Classifies annotations against one new text version.
pub struct AnnotationRecoverer<'a> {
    matcher: &'a FuzzyMatcher,
    thresholds: &'a RecoveryThresholds,
}

impl<'a> AnnotationRecoverer<'a> {
    pub fn new(matcher: &'a FuzzyMatcher, thresholds: &'a RecoveryThresholds) -> Self {
        Self {
            matcher,
            thresholds,
        }
    }

    /// Compute the rewritten row and outcome for every annotation.
    /// `new_chunks` must be in chunk-index order.
    pub fn plan(
        &self,
        annotations: &[Annotation],
        new_text: &str,
        new_chunks: &[Chunk],
        version: i64,
    ) -> Vec<(Annotation, AnnotationOutcome)> {
        let hay = Haystack::new(new_text);
        let spans: Vec<ChunkSpan> = new_chunks
            .iter()
            .map(|c| ChunkSpan {
                start: c.start_offset,
                end: c.end_offset,
            })
            .collect();
        let one = |a: &Annotation| self.plan_one(a, &hay, &spans, new_chunks, version);

        #[cfg(feature = "parallel")]
        let planned = annotations.par_iter().map(one).collect();
        #[cfg(not(feature = "parallel"))]
        let planned = annotations.iter().map(one).collect();
        planned
    }

    fn plan_one(
        &self,
        annotation: &Annotation,
        hay: &Haystack<'_>,
        spans: &[ChunkSpan],
        new_chunks: &[Chunk],
        version: i64,
    ) -> (Annotation, AnnotationOutcome) {
        let req = MatchRequest::new(&annotation.quote, hay)
            .with_context(annotation.context.as_ref())
            .with_chunks(annotation.chunk_index, spans)
            .with_hint(Some(annotation.start_offset));
        let found = self.matcher.find(&req);

        let mut row = annotation.clone();
        let confidence = found.map_or(0.0, |m| m.confidence);

        let outcome = match found {
            Some(m) if confidence >= self.thresholds.annotation_recover_floor => {
                let previous = annotation.anchor();
                let (chunk_index, chunk_ids) = overlapping_chunks(new_chunks, m.start, m.end);
                row.quote = hay.slice(m.start, m.end);
                row.start_offset = m.start;
                row.end_offset = m.end;
                row.context = Some(capture_context(hay.text(), m.start, m.end));
                row.chunk_index = chunk_index;
                row.chunk_ids = chunk_ids;
                row.recovery = Some(AnnotationRecovery {
                    method: Some(m.method),
                    confidence,
                    needs_review: false,
                    suggested_start: None,
                    suggested_end: None,
                    version,
                    previous: Some(previous),
                });
                AnnotationOutcome {
                    annotation_id: annotation.id.clone(),
                    status: RecoveryStatus::Recovered,
                    method: Some(m.method),
                    confidence,
                    start: Some(m.start),
                    end: Some(m.end),
                    detail: None,
                }
            }
            Some(m) if confidence >= self.thresholds.annotation_review_floor => {
                row.recovery = Some(AnnotationRecovery {
                    method: Some(m.method),
                    confidence,
                    needs_review: true,
                    suggested_start: Some(m.start),
                    suggested_end: Some(m.end),
                    version,
                    previous: None,
                });
                AnnotationOutcome {
                    annotation_id: annotation.id.clone(),
                    status: RecoveryStatus::NeedsReview,
                    method: Some(m.method),
                    confidence,
                    start: Some(m.start),
                    end: Some(m.end),
                    detail: None,
                }
            }
            _ => {
                let reason = match found {
                    Some(m) => format!(
                        "best {} match scored {:.2}, under the review floor",
                        m.method, m.confidence
                    ),
                    None => "no tier reached its floor".to_string(),
                };
                let failure = ReprocessError::MatchFailure {
                    item: format!("annotation {}", annotation.id),
                    reason,
                };
                row.recovery = Some(AnnotationRecovery {
                    method: None,
                    confidence: 0.0,
                    needs_review: false,
                    suggested_start: None,
                    suggested_end: None,
                    version,
                    previous: None,
                });
                AnnotationOutcome {
                    annotation_id: annotation.id.clone(),
                    status: RecoveryStatus::Lost,
                    method: None,
                    confidence: 0.0,
                    start: None,
                    end: None,
                    detail: Some(failure.to_string()),
                }
            }
        };
        (row, outcome)
    }
}

/// Recover every annotation of the session's document against the staged
/// chunks and persist the results. Original rows are handed to the session
/// first so a rollback can restore them.
pub async fn recover_annotations<S: Store + ?Sized>(
    store: &S,
    session: &mut ReprocessSession,
    recoverer: &AnnotationRecoverer<'_>,
    new_text: &str,
    new_chunks: &[Chunk],
) -> Result<AnnotationRecoveryReport> {
    let annotations = store.list_annotations(session.document_id()).await?;
    session.remember_annotations(&annotations);

    let planned = recoverer.plan(&annotations, new_text, new_chunks, session.new_version());
    let mut report = AnnotationRecoveryReport::default();
    for (row, outcome) in planned {
        store.update_annotation(&row).await?;
        report.push(outcome);
    }

    tracing::info!(
        document = %session.document_id(),
        total = report.total,
        recovered = report.recovered,
        needs_review = report.needs_review,
        lost = report.lost,
        "annotations recovered"
    );
    Ok(report)
}
