//! Edit-distance primitives.
//!
//! [`approximate_find`] is a semi-global alignment (Sellers' algorithm): the
//! needle must be matched completely, but it may start and end anywhere in
//! the window at no cost. It returns the span with the lowest edit distance,
//! which is exactly the "sliding window with small edit distance" search the
//! context and chunk-bounded tiers need, in `O(needle × window)`.

/// Best approximate occurrence of a needle inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMatch {
    /// Start offset (chars), relative to the window.
    pub start: usize,
    /// End offset (chars, exclusive), relative to the window.
    pub end: usize,
    pub distance: usize,
}

/// Classic Levenshtein distance between two char slices.
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Find the substring of `window` closest to `needle` by edit distance.
///
/// Ties on distance prefer the match whose length is closest to the
/// needle's, then the leftmost one. Returns `None` for an empty needle or
/// an empty window.
pub fn approximate_find(needle: &[char], window: &[char]) -> Option<WindowMatch> {
    let m = needle.len();
    let n = window.len();
    if m == 0 || n == 0 {
        return None;
    }

    // Column-major over the window: dist[i] = cost of aligning needle[..i]
    // ending at the current window position; start[i] = where that
    // alignment began in the window.
    let mut dist: Vec<usize> = (0..=m).collect();
    let mut start: Vec<usize> = vec![0; m + 1];
    let mut best: Option<WindowMatch> = if m <= n {
        None
    } else {
        // Everything deleted is still a (poor) alignment.
        Some(WindowMatch {
            start: 0,
            end: 0,
            distance: m,
        })
    };

    for j in 0..n {
        let mut prev_diag = dist[0];
        let mut prev_diag_start = start[0];
        // Free start: the alignment may begin at any window position.
        dist[0] = 0;
        start[0] = j + 1;
        for i in 1..=m {
            let cost = usize::from(needle[i - 1] != window[j]);
            let diag = prev_diag + cost;
            let up = dist[i - 1] + 1; // needle char unmatched
            let left = dist[i] + 1; // window char skipped

            let (value, origin) = if diag <= up && diag <= left {
                (diag, if i == 1 { j } else { prev_diag_start })
            } else if left <= up {
                (left, start[i])
            } else {
                (up, start[i - 1])
            };

            prev_diag = dist[i];
            prev_diag_start = start[i];
            dist[i] = value;
            start[i] = origin;
        }

        let candidate = WindowMatch {
            start: start[m].min(j + 1),
            end: j + 1,
            distance: dist[m],
        };
        best = Some(match best {
            None => candidate,
            Some(current) => pick_better(current, candidate, m),
        });
    }

    best
}

fn pick_better(current: WindowMatch, candidate: WindowMatch, needle_len: usize) -> WindowMatch {
    if candidate.distance != current.distance {
        return if candidate.distance < current.distance {
            candidate
        } else {
            current
        };
    }
    let len_gap = |w: &WindowMatch| (w.end - w.start).abs_diff(needle_len);
    if len_gap(&candidate) < len_gap(&current) {
        candidate
    } else {
        current
    }
}

/// Confidence for an edit-distance match: `1 − distance / needle_len`,
/// clamped to `[0, 1]`.
pub fn distance_confidence(distance: usize, needle_len: usize) -> f64 {
    if needle_len == 0 {
        return 0.0;
    }
    (1.0 - distance as f64 / needle_len as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
        assert_eq!(levenshtein(&chars("same"), &chars("same")), 0);
    }

    #[test]
    fn test_approximate_find_exact_occurrence() {
        let hay = chars("xx the quick brown fox yy");
        let m = approximate_find(&chars("quick brown"), &hay).unwrap();
        assert_eq!(m.distance, 0);
        assert_eq!(m.start, 7);
        assert_eq!(m.end, 18);
    }

    #[test]
    fn test_approximate_find_with_substitutions() {
        let hay = chars("preamble. the quack brawn fox jumps. tail");
        let m = approximate_find(&chars("the quick brown fox"), &hay).unwrap();
        assert_eq!(m.distance, 2);
        let found: String = hay[m.start..m.end].iter().collect();
        assert_eq!(found, "the quack brawn fox");
    }

    #[test]
    fn test_approximate_find_with_insertion() {
        let hay = chars("abc hello, world def");
        let m = approximate_find(&chars("hello world"), &hay).unwrap();
        assert_eq!(m.distance, 1);
        let found: String = hay[m.start..m.end].iter().collect();
        assert_eq!(found, "hello, world");
    }

    #[test]
    fn test_approximate_find_window_shorter_than_needle() {
        let m = approximate_find(&chars("abcdef"), &chars("abc")).unwrap();
        assert_eq!(m.distance, 3);
    }

    #[test]
    fn test_approximate_find_empty_inputs() {
        assert!(approximate_find(&[], &chars("abc")).is_none());
        assert!(approximate_find(&chars("abc"), &[]).is_none());
    }

    #[test]
    fn test_distance_confidence_clamps() {
        assert_eq!(distance_confidence(0, 10), 1.0);
        assert!((distance_confidence(2, 20) - 0.9).abs() < 1e-9);
        assert_eq!(distance_confidence(30, 10), 0.0);
        assert_eq!(distance_confidence(0, 0), 0.0);
    }
}
