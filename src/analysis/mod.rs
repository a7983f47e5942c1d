//! Forecasting core -- sample window, conditioning, BLR training, forecasts.

pub mod conditioning;
pub mod forecast;
pub mod model;
pub mod runner;
pub mod stats;
pub mod window;

use serde::{Deserialize, Serialize};

/// One tick of telemetry: a feature vector and the observed target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch seconds.
    pub timestamp: f64,
    pub features: Vec<f64>,
    pub target: f64,
}

impl Sample {
    pub fn new(timestamp: f64, features: Vec<f64>, target: f64) -> Self {
        Self {
            timestamp,
            features,
            target,
        }
    }

    /// Number of features carried by this sample.
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }
}
