//! Text normalization and character trigrams.
//!
//! Edits made by OCR cleanup or AI rewording tend to swap typographic quotes
//! and dashes, reflow whitespace, and change case. Normalizing both sides
//! before scoring keeps those edits from hiding an otherwise obvious match.

use std::collections::HashSet;

/// Map one character to its normalized form, or `None` to drop it.
fn normalize_char(c: char) -> Option<char> {
    match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => Some('\''),
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => Some('"'),
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' => Some('-'),
        '\u{00AD}' | '\u{200B}' | '\u{FEFF}' => None,
        c if c.is_whitespace() => Some(' '),
        c => Some(c),
    }
}

/// Normalize quotes, dashes, invisible characters, whitespace runs, and case.
///
/// ```rust
/// use reanchor_core::fuzzy::normalize::normalize_text;
///
/// assert_eq!(normalize_text("“Hello”\n\n  World—again"), "\"hello\" world-again");
/// ```
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for c in text.chars().filter_map(normalize_char) {
        if c == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.extend(c.to_lowercase());
            last_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Character trigrams of already-normalized text.
///
/// Text shorter than three characters yields itself as its only gram so
/// that short strings still compare equal to themselves.
pub fn trigrams(normalized: &str) -> HashSet<[char; 3]> {
    let chars: Vec<char> = normalized.chars().collect();
    let mut grams = HashSet::new();
    match chars.len() {
        0 => {}
        1 => {
            grams.insert([chars[0], '\0', '\0']);
        }
        2 => {
            grams.insert([chars[0], chars[1], '\0']);
        }
        _ => {
            for w in chars.windows(3) {
                grams.insert([w[0], w[1], w[2]]);
            }
        }
    }
    grams
}

/// Jaccard overlap `|A ∩ B| / |A ∪ B|`; `0.0` when both are empty.
pub fn jaccard(a: &HashSet<[char; 3]>, b: &HashSet<[char; 3]>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

/// Trigram Jaccard similarity of two raw strings after normalization.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&trigrams(&normalize_text(a)), &trigrams(&normalize_text(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_and_strips() {
        assert_eq!(normalize_text("  a\t\tb  "), "a b");
        assert_eq!(normalize_text("co\u{00AD}operate"), "cooperate");
        assert_eq!(normalize_text("It’s"), "it's");
    }

    #[test]
    fn test_similarity_identical_and_disjoint() {
        assert!((text_similarity("Memory palace", "memory  palace") - 1.0).abs() < 1e-9);
        assert_eq!(text_similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_short_strings_self_match() {
        assert_eq!(text_similarity("ab", "ab"), 1.0);
        assert_eq!(text_similarity("", ""), 0.0);
    }

    #[test]
    fn test_similarity_degrades_with_typos() {
        let sim = text_similarity(
            "the quick brown fox jumps over the lazy dog",
            "the quikc brown fax jumps over the lazy dog",
        );
        assert!(sim > 0.5 && sim < 1.0, "sim = {}", sim);
    }
}
