use serde::{Deserialize, Serialize};

/// Distance metric used by the chunk store.
///
/// One metric per store instance; the choice is persisted in schema metadata
/// so inserts and queries always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorMetric {
    #[default]
    L2,
    Cosine,
}

impl VectorMetric {
    /// Distance between two equal-length vectors. Lower is closer for both
    /// metrics (cosine is expressed as 1 − similarity).
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            VectorMetric::L2 => l2_distance(a, b),
            VectorMetric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Hamming distance between two 64-bit sign sketches.
#[inline]
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Collapse an embedding into a 64-bit sign sketch: bit i is set when
/// component i (of the first 64) is positive. Sketches let the store
/// prescreen candidates by [`hamming_distance`] before exact scoring on
/// large corpora.
pub fn sign_sketch(vector: &[f32]) -> u64 {
    let mut sketch = 0u64;
    for (i, v) in vector.iter().take(64).enumerate() {
        if *v > 0.0 {
            sketch |= 1u64 << i;
        }
    }
    sketch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_identity_and_full_flip() {
        assert_eq!(hamming_distance(0x0f0f, 0x0f0f), 0);
        assert_eq!(hamming_distance(0x00ff, 0xff00), 16);
    }

    #[test]
    fn l2_prefers_the_nearer_vector() {
        let q = [1.0, 0.0];
        let near = [0.9, 0.0];
        let far = [0.0, 1.0];
        assert!(l2_distance(&q, &near) < l2_distance(&q, &far));
    }

    #[test]
    fn cosine_is_scale_invariant() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_are_never_close() {
        assert_eq!(l2_distance(&[1.0], &[1.0, 2.0]), f32::INFINITY);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn sketch_tracks_component_signs() {
        let v = [1.0, -1.0, 0.5, -0.5];
        let s = sign_sketch(&v);
        assert_eq!(s & 0b1111, 0b0101);
    }
}
