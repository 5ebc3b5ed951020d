//! Cosine similarity between feature vectors.

use crate::embedding::FeatureVector;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScoreError {
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    /// Zero norm or non-finite components; cosine is undefined.
    #[error("degenerate vector")]
    DegenerateVector,
}

/// L2 norm of `v`, rejecting vectors with an undefined direction.
fn checked_norm(v: &FeatureVector) -> Result<f64, ScoreError> {
    if v.is_empty() || v.as_slice().iter().any(|x| !x.is_finite()) {
        return Err(ScoreError::DegenerateVector);
    }

    let norm = v.norm();
    if !norm.is_finite() || norm < f64::from(f32::EPSILON) {
        return Err(ScoreError::DegenerateVector);
    }

    Ok(norm)
}

/// Cosine similarity in [-1, 1].
///
/// Symmetric in its arguments. Fails on length mismatch and on
/// degenerate (zero-norm or non-finite) vectors. Sums run in f64.
pub fn cosine_similarity(a: &FeatureVector, b: &FeatureVector) -> Result<f32, ScoreError> {
    if a.len() != b.len() {
        return Err(ScoreError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let norm_a = checked_norm(a)?;
    let norm_b = checked_norm(b)?;

    let dot_product: f64 = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();

    Ok(((dot_product / (norm_a * norm_b)) as f32).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(values: &[f32]) -> FeatureVector {
        FeatureVector::new(values.to_vec())
    }

    #[test]
    fn test_identical_vectors() {
        let a = fv(&[0.2, 0.4, 0.9, 0.1]);
        let score = cosine_similarity(&a, &a).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_magnitude_does_not_matter() {
        let a = fv(&[1.0, 2.0, 3.0]);
        let b = fv(&[10.0, 20.0, 30.0]);
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors() {
        let a = fv(&[1.0, 0.0]);
        let b = fv(&[0.0, 1.0]);
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_opposite_vectors() {
        let a = fv(&[1.0, 1.0]);
        let b = fv(&[-1.0, -1.0]);
        assert!((cosine_similarity(&a, &b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetry() {
        let pairs = [
            (fv(&[0.3, -1.2, 4.0]), fv(&[2.0, 0.5, 0.5])),
            (fv(&[1e-3, 7.0, 0.0]), fv(&[5.0, 5.0, 5.0])),
            (fv(&[-2.0, 0.1, 0.9]), fv(&[0.4, 0.4, -8.0])),
        ];

        for (a, b) in pairs.iter() {
            assert_eq!(
                cosine_similarity(a, b).unwrap(),
                cosine_similarity(b, a).unwrap()
            );
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = fv(&[1.0, 2.0, 3.0]);
        let b = fv(&[1.0, 2.0]);

        assert_eq!(
            cosine_similarity(&a, &b),
            Err(ScoreError::DimensionMismatch { left: 3, right: 2 })
        );
        assert_eq!(
            cosine_similarity(&b, &a),
            Err(ScoreError::DimensionMismatch { left: 2, right: 3 })
        );
    }

    #[test]
    fn test_zero_vector_is_degenerate() {
        let a = fv(&[0.0, 0.0, 0.0]);
        let b = fv(&[1.0, 0.0, 0.0]);

        assert_eq!(cosine_similarity(&a, &b), Err(ScoreError::DegenerateVector));
        assert_eq!(cosine_similarity(&b, &a), Err(ScoreError::DegenerateVector));
    }

    #[test]
    fn test_nan_is_degenerate() {
        let a = fv(&[f32::NAN, 1.0]);
        let b = fv(&[1.0, 1.0]);
        assert_eq!(cosine_similarity(&a, &b), Err(ScoreError::DegenerateVector));
    }

    #[test]
    fn test_empty_vectors_are_degenerate() {
        assert_eq!(
            cosine_similarity(&fv(&[]), &fv(&[])),
            Err(ScoreError::DegenerateVector)
        );
    }

    #[test]
    fn test_large_components_do_not_overflow() {
        let a = fv(&[3.0e19, 4.0e19]);
        let b = fv(&[3.0, 4.0]);
        let c = fv(&[4.0e19, -3.0e19]);

        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_f32_max_components() {
        let a = fv(&[f32::MAX, f32::MAX]);
        let b = fv(&[1.0, 1.0]);
        // f64 sums keep this finite
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }
}
