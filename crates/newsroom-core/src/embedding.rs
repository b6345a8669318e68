//! Vector helpers: BLOB encoding, cosine similarity, cross-lingual fusion.
//!
//! Provider calls live in the app crate; everything here is pure.

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial floats are dropped.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`, i.e. `1 - cosine distance`.
///
/// Returns `0.0` for empty vectors, mismatched dimensions, or zero vectors.
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

/// Hybrid cross-lingual score: the better of the primary and translated
/// query similarities.
pub fn hybrid_similarity(primary: f64, translated: Option<f64>) -> f64 {
    match translated {
        Some(t) if t > primary => t,
        _ => primary,
    }
}

/// Query embeddings for one retrieval call.
#[derive(Debug, Clone)]
pub struct QueryVectors {
    pub primary: Vec<f32>,
    /// Embedding of the machine-translated query, for non-Latin input.
    pub translated: Option<Vec<f32>>,
}

impl QueryVectors {
    /// Score one stored embedding against the query.
    pub fn score(&self, embedding: &[f32]) -> f64 {
        let primary = cosine_similarity(&self.primary, embedding) as f64;
        let translated = self
            .translated
            .as_ref()
            .map(|t| cosine_similarity(t, embedding) as f64);
        hybrid_similarity(primary, translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_dims() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_hybrid_takes_max_over_unit_square() {
        let steps: Vec<f64> = (0..=20).map(|i| i as f64 / 20.0).collect();
        for &p in &steps {
            for &t in &steps {
                let h = hybrid_similarity(p, Some(t));
                assert_eq!(h, p.max(t));
                if t > p {
                    assert_eq!(h, t);
                }
            }
            assert_eq!(hybrid_similarity(p, None), p);
        }
    }

    #[test]
    fn test_query_vectors_translated_wins() {
        let q = QueryVectors {
            primary: vec![1.0, 0.0],
            translated: Some(vec![0.0, 1.0]),
        };
        let score = q.score(&[0.0, 1.0]);
        assert!((score - 1.0).abs() < 1e-6);
    }
}
