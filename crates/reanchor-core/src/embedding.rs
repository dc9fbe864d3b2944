//! Vector helpers for embedding-based recovery.
//!
//! Embeddings are produced elsewhere (by the derivation engine) and arrive
//! attached to chunks. This module only compares and serializes them.

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use reanchor_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing bytes that do not
/// form a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector, so a missing signal never looks like a match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Index and similarity of the candidate closest to `query`.
///
/// Candidates without a vector are skipped. Ties keep the earliest
/// candidate so results are deterministic.
pub fn most_similar<'a, I>(query: &[f32], candidates: I) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = Option<&'a [f32]>>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.into_iter().enumerate() {
        let Some(vec) = candidate else { continue };
        let sim = cosine_similarity(query, vec) as f64;
        match best {
            Some((_, best_sim)) if best_sim >= sim => {}
            _ => best = Some((i, sim)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_or_empty() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_most_similar_skips_missing_and_prefers_first_tie() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        let candidates: Vec<Option<&[f32]>> =
            vec![None, Some(b.as_slice()), Some(a.as_slice()), Some(a.as_slice())];
        let (idx, sim) = most_similar(&[1.0, 0.0], candidates).unwrap();
        assert_eq!(idx, 2);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_most_similar_none_without_vectors() {
        let candidates: Vec<Option<&[f32]>> = vec![None, None];
        assert!(most_similar(&[1.0], candidates).is_none());
    }
}
