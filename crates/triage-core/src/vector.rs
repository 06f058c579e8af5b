//! Embedding vectors and the similarity math used for grouping.
//!
//! Distances are cosine distances clamped to `[0, 1]`: `0` means identical
//! direction, `1` means orthogonal or opposed. A similarity threshold `s`
//! therefore corresponds to a maximum distance of `1 - s`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

/// A fixed-dimension embedding of an alert or a group representative.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wraps raw vector components.
    #[must_use]
    pub const fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Returns the vector components.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Consumes the embedding, returning its components.
    #[must_use]
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Checks the vector has the expected dimension and only finite components.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::EmbeddingDimensionMismatch` on a dimension mismatch,
    /// or `TriageError::InvalidAlert` if a component is NaN or infinite.
    pub fn check(&self, expected: usize) -> Result<()> {
        if self.dimension() != expected {
            return Err(TriageError::EmbeddingDimensionMismatch {
                expected,
                actual: self.dimension(),
            });
        }
        if self.0.iter().any(|v| !v.is_finite()) {
            return Err(TriageError::InvalidAlert {
                reason: "embedding contains non-finite values".to_string(),
            });
        }
        Ok(())
    }

    /// Cosine distance to another embedding, or `None` if either is degenerate.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> Option<f64> {
        cosine_distance(&self.0, &other.0)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Cosine similarity in `[-1, 1]`.
///
/// Returns `None` for mismatched lengths, empty input, or a zero-norm vector.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom).clamp(-1.0, 1.0))
}

/// Cosine distance `1 - cos`, clamped to `[0, 1]`.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    cosine_similarity(a, b).map(|s| (1.0 - s).clamp(0.0, 1.0))
}

/// Folds one more member vector into a running arithmetic mean.
///
/// `members_before` is the number of vectors already averaged into `centroid`.
/// With `members_before == 0` the centroid becomes a copy of `vector`.
pub fn absorb_into_mean(centroid: &mut Vec<f32>, members_before: usize, vector: &[f32]) {
    if members_before == 0 || centroid.len() != vector.len() {
        centroid.clear();
        centroid.extend_from_slice(vector);
        return;
    }
    let n = (members_before + 1) as f32;
    for (c, &v) in centroid.iter_mut().zip(vector) {
        *c += (v - *c) / n;
    }
}

/// Member-count weighted mean of two centroids.
#[must_use]
pub fn weighted_mean(a: &[f32], weight_a: usize, b: &[f32], weight_b: usize) -> Vec<f32> {
    if a.len() != b.len() || weight_a + weight_b == 0 {
        return if weight_a >= weight_b { a.to_vec() } else { b.to_vec() };
    }
    let wa = weight_a as f32;
    let wb = weight_b as f32;
    let total = wa + wb;
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x * wa + y * wb) / total)
        .collect()
}

/// Scales a vector to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm <= f64::EPSILON {
        return;
    }
    for v in vector.iter_mut() {
        *v = (f64::from(*v) / norm) as f32;
    }
}
