use serde::Serialize;
use std::collections::BTreeSet;

/// Forecast accuracy over a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastStats {
    pub count: usize,
    pub rmse: f64,
    pub mae: f64,
    pub mean_target: f64,
    /// RMSE relative to the mean target; 0 when the mean is 0.
    pub normalized_rmse: f64,
}

impl ForecastStats {
    /// Pairs are zipped; extra values on either side are ignored.
    pub fn compute(targets: &[f64], predictions: &[f64]) -> Self {
        let count = targets.len().min(predictions.len());
        if count == 0 {
            return Self {
                count: 0,
                rmse: 0.0,
                mae: 0.0,
                mean_target: 0.0,
                normalized_rmse: 0.0,
            };
        }

        let n = count as f64;
        let (mut sq, mut abs, mut sum) = (0.0, 0.0, 0.0);
        for (t, p) in targets.iter().zip(predictions.iter()) {
            let e = p - t;
            sq += e * e;
            abs += e.abs();
            sum += t;
        }

        let rmse = (sq / n).sqrt();
        let mean_target = sum / n;
        let normalized_rmse = if mean_target.abs() > f64::EPSILON {
            rmse / mean_target.abs()
        } else {
            0.0
        };

        Self {
            count,
            rmse,
            mae: abs / n,
            mean_target,
            normalized_rmse,
        }
    }
}

/// Detection quality against known attack ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionScore {
    pub detected: usize,
    pub ground_truth: usize,
    pub true_positives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl DetectionScore {
    /// Timestamps are compared exactly, as integer seconds.
    pub fn compute(detected: &BTreeSet<i64>, ground_truth: &BTreeSet<i64>) -> Self {
        let tp = detected.intersection(ground_truth).count();
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, detected.len());
        let recall = ratio(tp, ground_truth.len());
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            detected: detected.len(),
            ground_truth: ground_truth.len(),
            true_positives: tp,
            precision,
            recall,
            f1,
        }
    }
}

/// Trailing moving average; the first `window - 1` points average over what
/// is available. A window of 0 or 1 returns the input unchanged.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return values.to_vec();
    }
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        let n = (i + 1).min(window);
        out.push(sum / n as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_stats() {
        let stats = ForecastStats::compute(&[10.0, 20.0, 30.0], &[12.0, 18.0, 30.0]);
        assert_eq!(stats.count, 3);
        assert!((stats.mae - 4.0 / 3.0).abs() < 1e-12);
        assert!((stats.rmse - (8.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(stats.mean_target, 20.0);
        assert!((stats.normalized_rmse - stats.rmse / 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_forecast_stats_empty() {
        let stats = ForecastStats::compute(&[], &[1.0]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.rmse, 0.0);
    }

    #[test]
    fn test_detection_score() {
        let detected: BTreeSet<i64> = [1, 2, 3, 4].into_iter().collect();
        let truth: BTreeSet<i64> = [3, 4, 5, 6, 7, 8].into_iter().collect();
        let score = DetectionScore::compute(&detected, &truth);
        assert_eq!(score.true_positives, 2);
        assert!((score.precision - 0.5).abs() < 1e-12);
        assert!((score.recall - 1.0 / 3.0).abs() < 1e-12);
        assert!((score.f1 - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_detection_score_without_detections() {
        let score = DetectionScore::compute(&BTreeSet::new(), &[1].into_iter().collect());
        assert_eq!(score.f1, 0.0);
        assert_eq!(score.precision, 0.0);
    }

    #[test]
    fn test_moving_average() {
        let smoothed = moving_average(&[2.0, 4.0, 6.0, 8.0], 2);
        assert_eq!(smoothed, vec![2.0, 3.0, 5.0, 7.0]);
        assert_eq!(moving_average(&[1.0, 5.0], 0), vec![1.0, 5.0]);
    }
}
