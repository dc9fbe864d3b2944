//! Backfill semantic metadata onto fallback chunks from the previous version.
//!
//! Used only when derivation failed and the offsets-only chunker produced
//! bare chunks. Each new chunk looks for a donor among the previous
//! version's chunks that carry metadata, trying three signals in order:
//!
//! | Signal | Score | Default floor |
//! |--------|-------|---------------|
//! | embedding | cosine similarity (both sides need a vector) | 0.85 |
//! | lexical | trigram Jaccard of the first 200 normalized chars | 0.80 |
//! | position | overlap of the old span / new span length | 0.50 |
//!
//! The first signal whose best candidate reaches its floor decides the
//! donor. Metadata is copied only if that score also reaches the accept
//! floor (0.70 by default); otherwise the chunk stays `fallback`.

use serde::Serialize;

use crate::embedding::most_similar;
use crate::fuzzy::normalize::text_similarity;
use crate::models::{Chunk, ChunkProvenance, MetadataSource};
use crate::thresholds::RecoveryThresholds;

/// Characters of leading text compared by the lexical signal.
const LEXICAL_PREFIX_CHARS: usize = 200;

/// Which signal chose a donor chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSignal {
    Embedding,
    Lexical,
    Position,
}

impl MetadataSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Lexical => "lexical",
            Self::Position => "position",
        }
    }
}

/// A donor chosen for one new chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataMatch {
    pub source_chunk_id: String,
    pub signal: MetadataSignal,
    pub confidence: f64,
}

/// Totals from one [`recover_metadata`] pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataReport {
    pub total: usize,
    pub recovered: usize,
    pub by_embedding: usize,
    pub by_lexical: usize,
    pub by_position: usize,
    /// Left as `fallback`, awaiting backfill.
    pub unrecovered: usize,
}

fn prefix(text: &str) -> String {
    text.chars().take(LEXICAL_PREFIX_CHARS).collect()
}

/// Fraction of `new`'s span covered by `old`'s span.
fn position_overlap(new: &Chunk, old: &Chunk) -> f64 {
    let len = new.end_offset.saturating_sub(new.start_offset);
    if len == 0 {
        return 0.0;
    }
    let lo = new.start_offset.max(old.start_offset);
    let hi = new.end_offset.min(old.end_offset);
    hi.saturating_sub(lo) as f64 / len as f64
}

/// Index and score of the best candidate under `score`, first on ties.
fn best_by<F>(donors: &[&Chunk], score: F) -> Option<(usize, f64)>
where
    F: Fn(&Chunk) -> f64,
{
    donors
        .iter()
        .enumerate()
        .map(|(i, d)| (i, score(d)))
        .fold(None, |best, (i, s)| match best {
            Some((_, bs)) if bs >= s => best,
            _ => Some((i, s)),
        })
}

/// Pick a donor for `chunk` among `previous` chunks that carry metadata.
pub fn find_donor(
    chunk: &Chunk,
    previous: &[Chunk],
    thresholds: &RecoveryThresholds,
) -> Option<MetadataMatch> {
    let donors: Vec<&Chunk> = previous.iter().filter(|c| c.metadata.is_some()).collect();
    if donors.is_empty() {
        return None;
    }
    let pick = |i: usize, signal: MetadataSignal, confidence: f64| MetadataMatch {
        source_chunk_id: donors[i].id.clone(),
        signal,
        confidence,
    };

    if let Some(query) = chunk.embedding.as_deref() {
        let found = most_similar(query, donors.iter().map(|d| d.embedding.as_deref()));
        if let Some((i, sim)) = found {
            if sim >= thresholds.metadata_embedding_floor {
                return Some(pick(i, MetadataSignal::Embedding, sim));
            }
        }
    }

    let lead = prefix(&chunk.content);
    if let Some((i, sim)) = best_by(&donors, |d| text_similarity(&lead, &prefix(&d.content))) {
        if sim >= thresholds.metadata_lexical_floor {
            return Some(pick(i, MetadataSignal::Lexical, sim));
        }
    }

    if let Some((i, frac)) = best_by(&donors, |d| position_overlap(chunk, d)) {
        if frac >= thresholds.metadata_position_floor {
            return Some(pick(i, MetadataSignal::Position, frac));
        }
    }
    None
}

/// Copy metadata onto every `fallback` chunk in `chunks` that finds an
/// acceptable donor. Chunks that already have metadata are left alone.
pub fn recover_metadata(
    chunks: &mut [Chunk],
    previous: &[Chunk],
    thresholds: &RecoveryThresholds,
) -> MetadataReport {
    let mut report = MetadataReport::default();
    for chunk in chunks.iter_mut().filter(|c| c.metadata.is_none()) {
        report.total += 1;
        let donor = find_donor(chunk, previous, thresholds)
            .filter(|m| m.confidence >= thresholds.metadata_accept_floor);
        let Some(found) = donor else {
            chunk.metadata_source = MetadataSource::Fallback;
            report.unrecovered += 1;
            continue;
        };
        let Some(source) = previous.iter().find(|c| c.id == found.source_chunk_id) else {
            report.unrecovered += 1;
            continue;
        };

        chunk.metadata = source.metadata.clone();
        chunk.metadata_source = MetadataSource::Recovered;
        chunk.provenance = Some(ChunkProvenance {
            source_chunk_id: found.source_chunk_id.clone(),
            method: found.signal.as_str().to_string(),
            confidence: found.confidence,
        });
        report.recovered += 1;
        match found.signal {
            MetadataSignal::Embedding => report.by_embedding += 1,
            MetadataSignal::Lexical => report.by_lexical += 1,
            MetadataSignal::Position => report.by_position += 1,
        }
        tracing::debug!(
            chunk = chunk.chunk_index,
            source = %found.source_chunk_id,
            signal = found.signal.as_str(),
            confidence = found.confidence,
            "metadata recovered"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, DerivedChunk};

    fn chunk(content: &str, start: usize, meta: Option<&str>, emb: Option<Vec<f32>>) -> Chunk {
        Chunk::from_derived(
            "d",
            1,
            0,
            DerivedChunk {
                content: content.to_string(),
                start,
                end: start + content.chars().count(),
                metadata: meta.map(|theme| ChunkMetadata {
                    themes: vec![theme.to_string()],
                    importance: 0.5,
                    ..Default::default()
                }),
                embedding: emb,
            },
        )
    }

    #[test]
    fn test_embedding_signal_wins_first() {
        let th = RecoveryThresholds::default();
        let prev = vec![
            chunk("totally different words", 0, Some("a"), Some(vec![0.0, 1.0])),
            chunk("unrelated as well", 30, Some("b"), Some(vec![1.0, 0.05])),
        ];
        let new = chunk("fresh text here", 0, None, Some(vec![1.0, 0.0]));
        let m = find_donor(&new, &prev, &th).unwrap();
        assert_eq!(m.signal, MetadataSignal::Embedding);
        assert_eq!(m.source_chunk_id, prev[1].id);
    }

    #[test]
    fn test_lexical_signal_on_light_edit() {
        let th = RecoveryThresholds::default();
        let prev = vec![
            chunk("The memory palace is an ancient technique.", 0, Some("memory"), None),
            chunk("Gardening in the spring requires patience.", 50, Some("garden"), None),
        ];
        let mut new = vec![chunk(
            "The memory palace is an ancient technique!",
            200,
            None,
            None,
        )];
        let report = recover_metadata(&mut new, &prev, &th);
        assert_eq!(report.recovered, 1);
        assert_eq!(report.by_lexical, 1);
        assert_eq!(new[0].metadata_source, MetadataSource::Recovered);
        assert_eq!(new[0].metadata.as_ref().unwrap().themes, vec!["memory"]);
        let prov = new[0].provenance.as_ref().unwrap();
        assert_eq!(prov.source_chunk_id, prev[0].id);
        assert_eq!(prov.method, "lexical");
    }

    #[test]
    fn test_position_below_accept_floor_stays_fallback() {
        let th = RecoveryThresholds::default();
        // 60% positional overlap: a position match, but under the 0.70 accept floor.
        let prev = vec![chunk("aaaaaaaaaa", 0, Some("a"), None)];
        let mut new = vec![chunk("zzzzzzzzzz", 4, None, None)];
        let m = find_donor(&new[0], &prev, &th).unwrap();
        assert_eq!(m.signal, MetadataSignal::Position);
        assert!((m.confidence - 0.6).abs() < 1e-9);

        let report = recover_metadata(&mut new, &prev, &th);
        assert_eq!(report.unrecovered, 1);
        assert_eq!(new[0].metadata_source, MetadataSource::Fallback);
        assert!(new[0].metadata.is_none());
    }

    #[test]
    fn test_position_signal_accepted() {
        let th = RecoveryThresholds::default();
        let prev = vec![chunk("qqqqqqqqqq", 0, Some("q"), None)];
        let mut new = vec![chunk("wwwwwwwwww", 1, None, None)];
        let report = recover_metadata(&mut new, &prev, &th);
        assert_eq!(report.by_position, 1);
    }

    #[test]
    fn test_donors_without_metadata_are_ignored() {
        let th = RecoveryThresholds::default();
        let prev = vec![chunk("same text", 0, None, None)];
        let new = chunk("same text", 0, None, None);
        assert!(find_donor(&new, &prev, &th).is_none());
    }

    #[test]
    fn test_derived_chunks_untouched() {
        let th = RecoveryThresholds::default();
        let prev = vec![chunk("same text", 0, Some("old"), None)];
        let mut new = vec![chunk("same text", 0, Some("new"), None)];
        let report = recover_metadata(&mut new, &prev, &th);
        assert_eq!(report.total, 0);
        assert_eq!(new[0].metadata.as_ref().unwrap().themes, vec!["new"]);
    }
}
