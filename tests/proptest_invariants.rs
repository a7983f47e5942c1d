use nalgebra::{DMatrix, DVector};
use proptest::prelude::*;

use wattwatch::analysis::conditioning::conditioning_score;
use wattwatch::analysis::forecast::{forecast, MIN_PREDICTIVE_STDDEV};
use wattwatch::analysis::model::TrainedModel;
use wattwatch::analysis::window::SampleWindow;
use wattwatch::analysis::Sample;
use wattwatch::detect::anomaly::SeverityDetector;
use wattwatch::detect::engine::Outcome;
use wattwatch::detect::incident::summarize;

// Window keeps the most recent `capacity` samples, oldest first.
proptest! {
    #[test]
    fn prop_window_keeps_latest_in_order(
        capacity in 1usize..20,
        pushes in 0usize..60
    ) {
        let mut window = SampleWindow::new(capacity, 1);
        for i in 0..pushes {
            window.push(Sample::new(i as f64, vec![i as f64], 0.0)).unwrap();
        }

        let kept = pushes.min(capacity);
        prop_assert_eq!(window.len(), kept);
        prop_assert_eq!(window.is_full(), pushes >= capacity);

        let timestamps: Vec<f64> = window.iter().map(|s| s.timestamp).collect();
        let expected: Vec<f64> = (pushes - kept..pushes).map(|i| i as f64).collect();
        prop_assert_eq!(timestamps, expected);
    }
}

// Predictions are never negative and the spread never drops below the floor.
proptest! {
    #[test]
    fn prop_forecast_is_non_negative(
        weights in prop::collection::vec(-50.0f64..50.0, 1..6),
        scale in -20.0f64..20.0,
        beta in 1e-6f64..1e6,
        cov in 0.0f64..10.0
    ) {
        let m = weights.len();
        let model = TrainedModel {
            weights: DVector::from_vec(weights),
            alpha: 1.0,
            beta,
            posterior_covariance: DMatrix::identity(m, m) * cov,
            iterations: 1,
            converged: true,
        };
        let x: Vec<f64> = (0..m).map(|i| scale * (i as f64 + 1.0)).collect();

        let f = forecast(&model, &x);
        prop_assert!(f.prediction >= 0.0);
        prop_assert!(f.stddev >= MIN_PREDICTIVE_STDDEV);
    }
}

// A zero residual stream never moves the chart.
proptest! {
    #[test]
    fn prop_ewma_zero_residuals_stay_quiet(
        w in 0.01f64..=1.0,
        l in 0.5f64..5.0,
        targets in prop::collection::vec(0.0f64..1e4, 1..100)
    ) {
        let mut detector = SeverityDetector::new(w, l);
        for t in targets {
            let v = detector.update(t, t, 1.0);
            prop_assert_eq!(v.statistic, 0.0);
            prop_assert!(!v.anomaly);
        }
    }
}

// The statistic is a convex blend of past z-scores, so it never exceeds them.
proptest! {
    #[test]
    fn prop_ewma_bounded_by_inputs(
        w in 0.01f64..=1.0,
        residuals in prop::collection::vec(-100.0f64..100.0, 1..100)
    ) {
        let mut detector = SeverityDetector::new(w, 3.719);
        let mut max_z = 0.0f64;
        for r in residuals {
            let v = detector.update(0.0, r, 1.0);
            max_z = max_z.max(v.z.abs());
            prop_assert!(v.statistic.abs() <= max_z + 1e-9);
        }
    }
}

proptest! {
    #[test]
    fn prop_conditioning_score_in_unit_interval(
        rows in 1usize..12,
        cols in 1usize..5,
        values in prop::collection::vec(-10.0f64..10.0, 60)
    ) {
        let x = DMatrix::from_fn(rows, cols, |i, j| values[(i * cols + j) % values.len()]);
        let score = conditioning_score(&x);
        prop_assert!((0.0..=1.0).contains(&score));
    }
}

proptest! {
    #[test]
    fn prop_incidents_cover_only_flagged_blocks(
        flags in prop::collection::vec(any::<bool>(), 0..200),
        block in 1usize..25
    ) {
        let outcomes: Vec<Outcome> = flags
            .iter()
            .enumerate()
            .map(|(i, &anomaly)| Outcome {
                timestamp: 60.0 * i as f64,
                target: 1.0,
                prediction: 1.0,
                predictive_stddev: 1.0,
                statistic: 0.0,
                anomaly,
            })
            .collect();

        let incidents = summarize(&outcomes, block);
        let flagged_blocks = flags.chunks(block).filter(|c| c.iter().any(|&f| f)).count();
        prop_assert_eq!(incidents.len(), flagged_blocks);

        let total: usize = incidents.iter().map(|i| i.anomaly_count).sum();
        prop_assert_eq!(total, flags.iter().filter(|&&f| f).count());
    }
}
