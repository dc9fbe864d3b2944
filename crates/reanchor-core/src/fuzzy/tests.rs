use super::*;
use crate::models::TextContext;

fn matcher() -> FuzzyMatcher {
    FuzzyMatcher::new(&RecoveryThresholds::default())
}

fn filler(len: usize) -> String {
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit. "
        .chars()
        .cycle()
        .take(len)
        .collect()
}

/// Split text into fixed-size spans, standing in for a chunk list.
fn spans(text: &str, size: usize) -> Vec<ChunkSpan> {
    let n = text.chars().count();
    (0..n)
        .step_by(size)
        .map(|start| ChunkSpan {
            start,
            end: (start + size).min(n),
        })
        .collect()
}

#[test]
fn test_exact_unmoved_span() {
    let text = "It began simply: the quick brown fox leapt.";
    let hay = Haystack::new(text);
    let m = matcher()
        .find(&MatchRequest::new("the quick brown fox", &hay))
        .unwrap();
    assert_eq!(m.method, MatchMethod::Exact);
    assert_eq!(m.confidence, 1.0);
    assert_eq!(hay.slice(m.start, m.end), "the quick brown fox");
}

#[test]
fn test_exact_prefers_occurrence_nearest_hint() {
    let hay = Haystack::new("echo one, echo two, echo three");
    let m = matcher()
        .find(&MatchRequest::new("echo", &hay).with_hint(Some(19)))
        .unwrap();
    assert_eq!(m.start, 20);
}

#[test]
fn test_exact_reports_char_offsets_for_multibyte_text() {
    let hay = Haystack::new("café — naïve reader");
    let m = matcher()
        .find(&MatchRequest::new("naïve", &hay))
        .unwrap();
    assert_eq!((m.start, m.end), (7, 12));
}

#[test]
fn test_context_tier_after_shift_and_typo() {
    let before = "As the chapter opens, ";
    let original = "the archivist leaps over the ledger";
    let after = " and the story turns.";
    let edited = "the archivist leapt over the ledger";

    let text = format!("{}\n\n{}{}{}", filler(500), before, edited, after);
    let hay = Haystack::new(&text);
    let ctx = TextContext {
        before: before.to_string(),
        after: after.to_string(),
    };
    let m = matcher()
        .find(
            &MatchRequest::new(original, &hay)
                .with_context(Some(&ctx))
                .with_hint(Some(before.len())),
        )
        .unwrap();

    assert_eq!(m.method, MatchMethod::Context);
    assert!(m.confidence >= 0.9, "confidence = {}", m.confidence);
    assert_eq!(hay.slice(m.start, m.end), edited);
    assert!(m.start >= 500);
}

#[test]
fn test_context_tier_with_only_before_anchor() {
    let text = "Prologue here. Chapter one: a quite different openng line follows.";
    let hay = Haystack::new(text);
    let ctx = TextContext {
        before: "Chapter one: ".to_string(),
        after: "<<gone>>".to_string(),
    };
    let m = matcher()
        .find(&MatchRequest::new("a quite different opening line", &hay).with_context(Some(&ctx)))
        .unwrap();
    assert_eq!(m.method, MatchMethod::Context);
    assert_eq!(hay.slice(m.start, m.end), "a quite different openng line");
}

#[test]
fn test_chunk_bounded_tier_two_substitutions() {
    let text = format!(
        "{}the quack brown fex{}",
        filler(300),
        filler(300)
    );
    let hay = Haystack::new(&text);
    let chunks = spans(&text, 100);
    let m = matcher()
        .find(&MatchRequest::new("the quick brown fox", &hay).with_chunks(Some(3), &chunks))
        .unwrap();

    assert_eq!(m.method, MatchMethod::ChunkBounded);
    assert!(
        (0.75..=0.95).contains(&m.confidence),
        "confidence = {}",
        m.confidence
    );
    assert_eq!(hay.slice(m.start, m.end), "the quack brown fex");
}

#[test]
fn test_chunk_bounded_ignores_text_outside_neighborhood() {
    let text = format!("the quack brown fex{}", filler(2000));
    let hay = Haystack::new(&text);
    let chunks = spans(&text, 100);
    let tier = ChunkBoundedTier::new(0.75, 2);
    let req = MatchRequest::new("the quick brown fox", &hay).with_chunks(Some(15), &chunks);
    assert!(tier.attempt(&req).is_none());
}

#[test]
fn test_trigram_tier_handles_case_and_punctuation_drift() {
    let text = format!(
        "{} “The Quick Brown Fox”  jumps over the lazy dog. {}",
        filler(120),
        filler(120)
    );
    let hay = Haystack::new(&text);
    let m = matcher()
        .find(&MatchRequest::new(
            "\"the quick brown fox\" jumps over the lazy dog.",
            &hay,
        ))
        .unwrap();
    assert_eq!(m.method, MatchMethod::Trigram);
    assert!(m.confidence >= 0.6 && m.confidence <= 0.9);
    assert!(hay.slice(m.start, m.end).contains("Quick Brown"));
}

#[test]
fn test_deleted_span_is_not_found() {
    let text = "Gardening notes: compost, mulch, and soil temperature readings.";
    let hay = Haystack::new(text);
    let ctx = TextContext {
        before: "Once upon a time ".to_string(),
        after: " ran away.".to_string(),
    };
    let chunks = spans(text, 20);
    let req = MatchRequest::new("the quick brown fox", &hay)
        .with_context(Some(&ctx))
        .with_chunks(Some(0), &chunks);
    assert!(matcher().find(&req).is_none());
}

#[test]
fn test_empty_needle_or_haystack() {
    let hay = Haystack::new("some text");
    assert!(matcher().find(&MatchRequest::new("", &hay)).is_none());
    let empty = Haystack::new("");
    assert!(matcher().find(&MatchRequest::new("text", &empty)).is_none());
}

#[test]
fn test_earlier_tier_wins_over_later() {
    // Both context and chunk-bounded would accept; context runs first.
    let text = "Before: the quick brwn fox :after and more";
    let hay = Haystack::new(text);
    let ctx = TextContext {
        before: "Before: ".to_string(),
        after: " :after".to_string(),
    };
    let chunks = spans(text, 10);
    let m = matcher()
        .find(
            &MatchRequest::new("the quick brown fox", &hay)
                .with_context(Some(&ctx))
                .with_chunks(Some(1), &chunks),
        )
        .unwrap();
    assert_eq!(m.method, MatchMethod::Context);
}

struct PinnedTier;

impl MatchStrategy for PinnedTier {
    fn method(&self) -> MatchMethod {
        MatchMethod::Trigram
    }

    fn attempt(&self, _req: &MatchRequest<'_>) -> Option<MatchResult> {
        Some(MatchResult {
            start: 0,
            end: 1,
            confidence: 0.5,
            method: MatchMethod::Trigram,
        })
    }
}

#[test]
fn test_custom_tier_can_be_inserted_first() {
    let m = FuzzyMatcher::with_strategies(vec![Box::new(PinnedTier), Box::new(ExactTier)]);
    let hay = Haystack::new("abc");
    let found = m.find(&MatchRequest::new("abc", &hay)).unwrap();
    assert_eq!((found.start, found.end), (0, 1));
    assert_eq!(
        m.tiers().collect::<Vec<_>>(),
        vec![MatchMethod::Trigram, MatchMethod::Exact]
    );
}

#[test]
fn test_tiers_in_default_order() {
    assert_eq!(
        matcher().tiers().collect::<Vec<_>>(),
        vec![
            MatchMethod::Exact,
            MatchMethod::Context,
            MatchMethod::ChunkBounded,
            MatchMethod::Trigram
        ]
    );
}
