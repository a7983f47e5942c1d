//! EWMA control chart over standardized forecast residuals.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Canonical (weight, multiplier) pairs for the EWMA chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityPreset {
    /// w = 0.53, L = 3.714
    Smooth,
    /// w = 0.84, L = 3.719
    Balanced,
    /// w = 1.00, L = 3.719 -- no memory, the raw z-score.
    Raw,
}

impl SeverityPreset {
    pub fn params(self) -> (f64, f64) {
        match self {
            SeverityPreset::Smooth => (0.53, 3.714),
            SeverityPreset::Balanced => (0.84, 3.719),
            SeverityPreset::Raw => (1.00, 3.719),
        }
    }
}

impl FromStr for SeverityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smooth" => Ok(SeverityPreset::Smooth),
            "balanced" => Ok(SeverityPreset::Balanced),
            "raw" => Ok(SeverityPreset::Raw),
            other => Err(format!(
                "unknown severity preset '{}' (expected smooth, balanced or raw)",
                other
            )),
        }
    }
}

/// Running state of the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EwmaState {
    pub running_statistic: f64,
    /// Expected residual; held at zero.
    pub baseline_mean: f64,
    /// Weight of the newest standardized residual, in `(0, 1]`.
    pub decay_weight: f64,
    pub control_multiplier: f64,
}

/// Result of folding one residual into the chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeverityVerdict {
    pub z: f64,
    pub statistic: f64,
    pub limit: f64,
    pub anomaly: bool,
}

/// Turns (target, prediction) pairs into a binary anomaly signal.
///
/// `S_t = w·z_t + (1 - w)·S_{t-1}`, anomaly when `|S_t| > L·sqrt(w / (2 - w))`.
/// With `w = 1` the chart has no memory and reduces to a z-score test.
#[derive(Debug, Clone)]
pub struct SeverityDetector {
    state: EwmaState,
    limit: f64,
}

impl SeverityDetector {
    /// Parameters must already be validated: `w ∈ (0, 1]`, `L > 0`.
    pub fn new(decay_weight: f64, control_multiplier: f64) -> Self {
        let limit = control_limit(decay_weight, control_multiplier);
        Self {
            state: EwmaState {
                running_statistic: 0.0,
                baseline_mean: 0.0,
                decay_weight,
                control_multiplier,
            },
            limit,
        }
    }

    pub fn from_preset(preset: SeverityPreset) -> Self {
        let (w, l) = preset.params();
        Self::new(w, l)
    }

    pub fn state(&self) -> &EwmaState {
        &self.state
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    /// Fold one tick into the chart. The statistic always advances; only the
    /// verdict depends on the limit.
    pub fn update(&mut self, target: f64, prediction: f64, stddev: f64) -> SeverityVerdict {
        let residual = prediction - target;
        let z = (residual - self.state.baseline_mean) / stddev;
        // A non-finite residual would poison every later tick.
        let z = if z.is_finite() { z } else { 0.0 };

        let w = self.state.decay_weight;
        let statistic = w * z + (1.0 - w) * self.state.running_statistic;
        self.state.running_statistic = statistic;

        SeverityVerdict {
            z,
            statistic,
            limit: self.limit,
            anomaly: statistic.abs() > self.limit,
        }
    }
}

/// `L · sqrt(w / (2 - w))`
pub fn control_limit(decay_weight: f64, control_multiplier: f64) -> f64 {
    control_multiplier * (decay_weight / (2.0 - decay_weight)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_limits_for_presets() {
        let raw = SeverityDetector::from_preset(SeverityPreset::Raw);
        assert!((raw.limit() - 3.719).abs() < 1e-12);

        let balanced = SeverityDetector::from_preset(SeverityPreset::Balanced);
        let expected = 3.719 * (0.84_f64 / 1.16).sqrt();
        assert!((balanced.limit() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_residuals_never_alarm() {
        for preset in [SeverityPreset::Smooth, SeverityPreset::Balanced, SeverityPreset::Raw] {
            let mut d = SeverityDetector::from_preset(preset);
            for _ in 0..500 {
                let v = d.update(100.0, 100.0, 1.0);
                assert!(!v.anomaly);
            }
            assert!(d.state().running_statistic.abs() < 1e-12);
        }
    }

    #[test]
    fn test_statistic_decays_towards_zero() {
        let mut d = SeverityDetector::from_preset(SeverityPreset::Smooth);
        d.update(0.0, 2.0, 1.0);
        let first = d.state().running_statistic;
        for _ in 0..50 {
            d.update(5.0, 5.0, 1.0);
        }
        assert!(first > 0.0);
        assert!(d.state().running_statistic.abs() < 1e-10);
    }

    #[test]
    fn test_sustained_residual_triggers_then_clears() {
        let mut d = SeverityDetector::from_preset(SeverityPreset::Smooth);

        let mut flagged = false;
        for _ in 0..20 {
            flagged |= d.update(0.0, 10.0, 1.0).anomaly;
        }
        assert!(flagged);
        assert!(d.update(0.0, 10.0, 1.0).anomaly);

        let mut cleared = false;
        for _ in 0..20 {
            cleared = !d.update(0.0, 0.0, 1.0).anomaly;
        }
        assert!(cleared);
    }

    #[test]
    fn test_raw_preset_has_no_memory() {
        let mut d = SeverityDetector::from_preset(SeverityPreset::Raw);
        assert!(d.update(0.0, 50.0, 1.0).anomaly);
        let v = d.update(0.0, 0.5, 1.0);
        assert!(!v.anomaly);
        assert!((v.statistic - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_negative_residual_also_alarms() {
        let mut d = SeverityDetector::from_preset(SeverityPreset::Raw);
        let v = d.update(200.0, 2.0, 1.0);
        assert!(v.z < 0.0);
        assert!(v.anomaly);
    }

    #[test]
    fn test_non_finite_residual_ignored() {
        let mut d = SeverityDetector::from_preset(SeverityPreset::Balanced);
        let v = d.update(f64::NAN, 1.0, 1.0);
        assert_eq!(v.z, 0.0);
        assert!(!v.anomaly);
        assert!(d.state().running_statistic.is_finite());
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("Balanced".parse::<SeverityPreset>(), Ok(SeverityPreset::Balanced));
        assert!("loud".parse::<SeverityPreset>().is_err());
    }
}
