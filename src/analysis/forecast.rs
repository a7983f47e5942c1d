use crate::analysis::model::TrainedModel;
use nalgebra::DVector;
use serde::Serialize;

/// Lower bound on the predictive standard deviation. Keeps a near-perfect fit
/// from blowing up the standardized residual.
pub const MIN_PREDICTIVE_STDDEV: f64 = 1.0;

/// A point forecast with its predictive uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Forecast {
    /// `max(0, wᵗx)`; the modelled quantity is never negative.
    pub prediction: f64,
    /// `max(1, sqrt(1/beta + xᵗSx))`
    pub stddev: f64,
}

/// Forecast the target for feature vector `x`.
///
/// `x` must have the model's feature count; the engine guarantees this by
/// validating samples on entry.
pub fn forecast(model: &TrainedModel, x: &[f64]) -> Forecast {
    debug_assert_eq!(x.len(), model.feature_count());
    let x = DVector::from_column_slice(x);

    let raw = model.weights.dot(&x);
    let prediction = if raw.is_finite() { raw.max(0.0) } else { 0.0 };

    let spread = x.dot(&(&model.posterior_covariance * &x));
    let variance = model.noise_variance() + spread.max(0.0);
    let stddev = if variance.is_finite() {
        variance.sqrt().max(MIN_PREDICTIVE_STDDEV)
    } else {
        f64::MAX.sqrt()
    };

    Forecast { prediction, stddev }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn model(weights: &[f64], beta: f64, cov_scale: f64) -> TrainedModel {
        let m = weights.len();
        TrainedModel {
            weights: DVector::from_column_slice(weights),
            alpha: 1.0,
            beta,
            posterior_covariance: DMatrix::identity(m, m) * cov_scale,
            iterations: 1,
            converged: true,
        }
    }

    #[test]
    fn test_negative_inner_product_clamped_to_zero() {
        let m = model(&[-3.0, 1.0], 1.0, 0.0);
        let f = forecast(&m, &[2.0, 1.0]);
        assert_eq!(f.prediction, 0.0);
    }

    #[test]
    fn test_prediction_is_inner_product() {
        let m = model(&[1.5, 2.0], 1.0, 0.0);
        let f = forecast(&m, &[2.0, 3.0]);
        assert!((f.prediction - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_stddev_floor_applies() {
        let m = model(&[1.0], 1e6, 1e-9);
        let f = forecast(&m, &[1.0]);
        assert_eq!(f.stddev, MIN_PREDICTIVE_STDDEV);
    }

    #[test]
    fn test_stddev_combines_noise_and_parameter_uncertainty() {
        // 1/beta = 4, xᵗSx = 2 * (1 + 4) = 10
        let m = model(&[0.0, 0.0], 0.25, 2.0);
        let f = forecast(&m, &[1.0, 2.0]);
        assert!((f.stddev - 14.0_f64.sqrt()).abs() < 1e-12);
    }
}
