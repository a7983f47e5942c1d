//! Bayesian linear regression with evidence-based hyperparameters.
//!
//! `train` is a pure function of the window contents. It alternates between
//! the posterior over the weights and a re-estimate of the prior precision
//! `alpha` and the noise precision `beta` (evidence maximisation), for a
//! bounded number of iterations.

use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

const INITIAL_ALPHA: f64 = 1.0;
const INITIAL_BETA: f64 = 1.0;
const MAX_ITERATIONS: usize = 100;
const RELATIVE_TOLERANCE: f64 = 1e-6;

/// Hyperparameters are kept inside this band so a perfect fit (zero residual)
/// or a zero weight vector cannot push them to infinity.
const PRECISION_FLOOR: f64 = 1e-10;
const PRECISION_CEIL: f64 = 1e10;

/// Smallest ridge added when the precision matrix is not positive-definite.
const INITIAL_RIDGE: f64 = 1e-9;
const MAX_RIDGE_ATTEMPTS: usize = 12;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("empty training window")]
    EmptyWindow,

    #[error("shape mismatch: {rows} feature rows but {targets} targets")]
    ShapeMismatch { rows: usize, targets: usize },

    #[error("training data contains non-finite values")]
    NonFinite,

    #[error("posterior precision matrix could not be factorised")]
    Singular,
}

/// A fitted model. Replaced wholesale on every retrain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainedModel {
    /// Posterior mean of the weights.
    pub weights: DVector<f64>,
    /// Prior precision (regularisation strength).
    pub alpha: f64,
    /// Noise precision.
    pub beta: f64,
    /// `(alpha·I + beta·XᵗX)⁻¹`
    pub posterior_covariance: DMatrix<f64>,
    /// Evidence iterations actually run.
    pub iterations: usize,
    pub converged: bool,
}

impl TrainedModel {
    pub fn feature_count(&self) -> usize {
        self.weights.len()
    }

    /// Effective noise variance `1/beta`.
    pub fn noise_variance(&self) -> f64 {
        1.0 / self.beta
    }
}

/// Fit a BLR model to `x` (n×m) and `y` (n).
pub fn train(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<TrainedModel, TrainError> {
    let (n, m) = x.shape();
    if n == 0 || m == 0 {
        return Err(TrainError::EmptyWindow);
    }
    if y.len() != n {
        return Err(TrainError::ShapeMismatch {
            rows: n,
            targets: y.len(),
        });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(TrainError::NonFinite);
    }

    let xt = x.transpose();
    let xtx = &xt * x;
    let xty = &xt * y;

    // Eigenvalues of XᵗX are fixed for the whole loop; scale by beta per step.
    let eigenvalues: Vec<f64> = SymmetricEigen::new(xtx.clone())
        .eigenvalues
        .iter()
        .map(|&l| l.max(0.0))
        .collect();

    let mut alpha = INITIAL_ALPHA;
    let mut beta = INITIAL_BETA;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < MAX_ITERATIONS {
        iterations += 1;

        let cov = posterior_covariance(&xtx, alpha, beta)?;
        let weights = (&cov * &xty) * beta;

        let gamma: f64 = eigenvalues
            .iter()
            .map(|&l| beta * l / (alpha + beta * l))
            .sum();

        let sse = sum_squared_error(x, y, &weights);
        let w_norm_sq = weights.dot(&weights);

        let next_alpha = clamp_precision(gamma / w_norm_sq.max(f64::MIN_POSITIVE));
        let next_beta = clamp_precision((n as f64 - gamma).max(0.0) / sse.max(f64::MIN_POSITIVE));

        let settled = relative_change(alpha, next_alpha) < RELATIVE_TOLERANCE
            && relative_change(beta, next_beta) < RELATIVE_TOLERANCE;
        alpha = next_alpha;
        beta = next_beta;

        if settled {
            converged = true;
            break;
        }
    }

    if !converged {
        debug!(iterations, alpha, beta, "evidence iteration hit cap");
    }

    // Recompute with the final hyperparameters so the model is self-consistent.
    let cov = posterior_covariance(&xtx, alpha, beta)?;
    let weights = (&cov * &xty) * beta;

    Ok(TrainedModel {
        weights,
        alpha,
        beta,
        posterior_covariance: cov,
        iterations,
        converged,
    })
}

/// `(alpha·I + beta·XᵗX)⁻¹` via Cholesky, falling back to an increasing
/// ridge on the diagonal when the matrix is not numerically positive-definite.
fn posterior_covariance(
    xtx: &DMatrix<f64>,
    alpha: f64,
    beta: f64,
) -> Result<DMatrix<f64>, TrainError> {
    let m = xtx.nrows();
    let precision = xtx * beta + DMatrix::<f64>::identity(m, m) * alpha;

    let mut ridge = 0.0;
    for attempt in 0..=MAX_RIDGE_ATTEMPTS {
        let candidate = if ridge > 0.0 {
            &precision + DMatrix::<f64>::identity(m, m) * ridge
        } else {
            precision.clone()
        };

        if let Some(chol) = Cholesky::new(candidate) {
            if attempt > 0 {
                warn!(ridge, "precision matrix needed ridge regularisation");
            }
            let inv = chol.inverse();
            if inv.iter().all(|v| v.is_finite()) {
                return Ok(symmetrize(inv));
            }
        }

        let scale = precision.diagonal().amax().max(1.0);
        ridge = if ridge == 0.0 {
            INITIAL_RIDGE * scale
        } else {
            ridge * 10.0
        };
    }

    Err(TrainError::Singular)
}

fn sum_squared_error(x: &DMatrix<f64>, y: &DVector<f64>, weights: &DVector<f64>) -> f64 {
    let residual = y - x * weights;
    residual.dot(&residual)
}

fn symmetrize(p: DMatrix<f64>) -> DMatrix<f64> {
    (&p + p.transpose()) * 0.5
}

fn clamp_precision(v: f64) -> f64 {
    if v.is_nan() {
        return PRECISION_FLOOR;
    }
    v.clamp(PRECISION_FLOOR, PRECISION_CEIL)
}

fn relative_change(old: f64, new: f64) -> f64 {
    (new - old).abs() / old.abs().max(f64::MIN_POSITIVE)
}
