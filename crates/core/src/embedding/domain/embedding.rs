use serde::{Deserialize, Serialize};

/// A unit-length appearance vector.
///
/// Construction always normalizes, so the dot product of two vectors is
/// their cosine similarity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// L2-normalizes raw model output. Returns `None` for an empty or
    /// all-zero vector, which cannot be compared meaningfully.
    pub fn from_raw(mut values: Vec<f32>) -> Option<Self> {
        if values.is_empty() || !l2_normalize(&mut values) {
            return None;
        }
        Some(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Cosine similarity in [-1, 1], or `None` if the dimensions differ.
    pub fn similarity(&self, other: &EmbeddingVector) -> Option<f64> {
        if self.dim() != other.dim() {
            return None;
        }
        let dot: f64 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (*a as f64) * (*b as f64))
            .sum();
        Some(dot.clamp(-1.0, 1.0))
    }

    /// Re-normalizes after deserialization; stored vectors may have
    /// drifted through rounding or been written by another tool.
    pub fn renormalized(self) -> Option<Self> {
        Self::from_raw(self.0)
    }
}

/// Normalizes in place. Returns `false` when the norm is zero or not finite.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_raw_normalizes() {
        let v = EmbeddingVector::from_raw(vec![3.0, 4.0]).unwrap();
        assert_relative_eq!(v.as_slice()[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v.as_slice()[1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_from_raw_rejects_degenerate_vectors() {
        assert!(EmbeddingVector::from_raw(vec![]).is_none());
        assert!(EmbeddingVector::from_raw(vec![0.0, 0.0, 0.0]).is_none());
        assert!(EmbeddingVector::from_raw(vec![f32::NAN, 1.0]).is_none());
    }

    #[test]
    fn test_similarity_of_identical_is_one() {
        let v = EmbeddingVector::from_raw(vec![1.0, 2.0, 3.0]).unwrap();
        assert_relative_eq!(v.similarity(&v).unwrap(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal_and_opposite() {
        let x = EmbeddingVector::from_raw(vec![1.0, 0.0]).unwrap();
        let y = EmbeddingVector::from_raw(vec![0.0, 1.0]).unwrap();
        let neg_x = EmbeddingVector::from_raw(vec![-1.0, 0.0]).unwrap();
        assert_relative_eq!(x.similarity(&y).unwrap(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(x.similarity(&neg_x).unwrap(), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_similarity_dimension_mismatch() {
        let a = EmbeddingVector::from_raw(vec![1.0, 0.0]).unwrap();
        let b = EmbeddingVector::from_raw(vec![1.0, 0.0, 0.0]).unwrap();
        assert!(a.similarity(&b).is_none());
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let v = EmbeddingVector::from_raw(vec![1.0, 0.0]).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "[1.0,0.0]");
        let back: EmbeddingVector = serde_json::from_str("[2.0,0.0]").unwrap();
        assert_eq!(back.renormalized().unwrap().as_slice(), &[1.0, 0.0]);
    }
}
