//! Well-conditioning check for a window's feature matrix.
//!
//! Training on a window whose features are constant, collinear or otherwise
//! rank-deficient gives an ill-posed regression. The score here is the
//! numerical rank of the feature matrix divided by the number of features,
//! so a full-rank window scores 1.0 and every redundant column costs
//! `1/m`.

use nalgebra::{DMatrix, SVD};
use serde::Serialize;

/// Training is attempted only when the score is strictly above this.
pub const CONDITIONING_THRESHOLD: f64 = 0.5;

/// Diagnostic breakdown of a conditioning check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConditioningReport {
    pub rank: usize,
    pub feature_count: usize,
    /// `rank / feature_count`, in `[0, 1]`.
    pub score: f64,
    /// `sigma_min / sigma_max`; 0 for a zero matrix.
    pub singular_ratio: f64,
}

impl ConditioningReport {
    pub fn passes(&self) -> bool {
        self.score > CONDITIONING_THRESHOLD
    }
}

/// Inspect the feature-only sub-matrix of a window.
pub fn inspect(features: &DMatrix<f64>) -> ConditioningReport {
    let (n, m) = features.shape();
    if n == 0 || m == 0 {
        return ConditioningReport {
            rank: 0,
            feature_count: m,
            score: 0.0,
            singular_ratio: 0.0,
        };
    }

    let svd = SVD::new(features.clone(), false, false);
    let sv = svd.singular_values;
    let sigma_max = sv.iter().cloned().fold(0.0_f64, f64::max);
    if !sigma_max.is_finite() || sigma_max <= 0.0 {
        return ConditioningReport {
            rank: 0,
            feature_count: m,
            score: 0.0,
            singular_ratio: 0.0,
        };
    }
    let sigma_min = sv.iter().cloned().fold(f64::INFINITY, f64::min);

    // Same cut-off as LAPACK-style rank estimation.
    let tol = sigma_max * n.max(m) as f64 * f64::EPSILON;
    let rank = sv.iter().filter(|&&s| s > tol).count();

    // A wide matrix (n < m) has only n singular values; missing ones are zero.
    let singular_ratio = if sv.len() < m { 0.0 } else { sigma_min / sigma_max };

    ConditioningReport {
        rank,
        feature_count: m,
        score: (rank as f64 / m as f64).clamp(0.0, 1.0),
        singular_ratio,
    }
}

/// Conditioning score in `[0, 1]`; see [`inspect`].
pub fn conditioning_score(features: &DMatrix<f64>) -> f64 {
    inspect(features).score
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise_matrix(n: usize, m: usize, seed: u64) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        DMatrix::from_fn(n, m, |_, _| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn test_independent_columns_score_one() {
        let x = noise_matrix(50, 3, 7);
        let report = inspect(&x);
        assert_eq!(report.rank, 3);
        assert_eq!(report.score, 1.0);
        assert!(report.singular_ratio > 0.0);
        assert!(report.passes());
    }

    #[test]
    fn test_duplicated_column_scores_lower_than_noise() {
        let base = noise_matrix(40, 3, 11);

        let mut duplicated = base.clone();
        let col0 = duplicated.column(0).clone_owned();
        duplicated.set_column(2, &col0);

        let mut replaced = base.clone();
        let fresh = noise_matrix(40, 1, 99);
        replaced.set_column(2, &fresh.column(0).clone_owned());

        assert!(conditioning_score(&duplicated) < conditioning_score(&replaced));
    }

    #[test]
    fn test_constant_features_do_not_pass() {
        // Two identical constant columns: rank one of two.
        let x = DMatrix::from_element(24, 2, 1.0);
        let report = inspect(&x);
        assert_eq!(report.rank, 1);
        assert_eq!(report.score, 0.5);
        assert!(!report.passes());
    }

    #[test]
    fn test_zero_and_empty_matrices_score_zero() {
        assert_eq!(conditioning_score(&DMatrix::zeros(10, 4)), 0.0);
        assert_eq!(conditioning_score(&DMatrix::zeros(0, 4)), 0.0);
    }

    #[test]
    fn test_wide_matrix_is_rank_limited() {
        let x = noise_matrix(2, 5, 3);
        let report = inspect(&x);
        assert_eq!(report.rank, 2);
        assert_eq!(report.singular_ratio, 0.0);
        assert!(!report.passes());
    }
}
