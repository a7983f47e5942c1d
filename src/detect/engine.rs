//! Online forecasting + severity engine.
//!
//! One `advance` call per arriving sample: push into the window, retrain on
//! schedule, forecast, then fold the residual into the EWMA chart.

use crate::analysis::conditioning;
use crate::analysis::forecast::{self, Forecast};
use crate::analysis::model::{self, TrainedModel};
use crate::analysis::window::SampleWindow;
use crate::analysis::Sample;
use crate::detect::anomaly::SeverityDetector;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("sample has {got} features, engine expects {expected}")]
    FeatureCountMismatch { expected: usize, got: usize },

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// Tuning for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minutes between samples. Only the live poller uses it for pacing.
    pub granularity_minutes: u32,
    /// Window length, counted in retraining intervals.
    pub training_window: usize,
    /// Ticks between retraining attempts.
    pub training_interval: usize,
    pub feature_count: usize,
    pub decay_weight: f64,
    pub control_multiplier: f64,
}

impl EngineConfig {
    /// Window capacity in ticks. Saturates; `validate` rejects overflow.
    pub fn window_len(&self) -> usize {
        self.training_window.saturating_mul(self.training_interval)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.granularity_minutes == 0 {
            return Err(EngineError::InvalidConfig(
                "granularity_minutes must be positive".into(),
            ));
        }
        if self.training_window == 0 || self.training_interval == 0 {
            return Err(EngineError::InvalidConfig(
                "training_window and training_interval must be positive".into(),
            ));
        }
        if self
            .training_window
            .checked_mul(self.training_interval)
            .is_none()
        {
            return Err(EngineError::InvalidConfig(format!(
                "window of {} intervals x {} ticks overflows",
                self.training_window, self.training_interval
            )));
        }
        if self.feature_count == 0 {
            return Err(EngineError::InvalidConfig(
                "feature_count must be positive".into(),
            ));
        }
        if !(self.decay_weight > 0.0 && self.decay_weight <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "decay_weight must be in (0, 1], got {}",
                self.decay_weight
            )));
        }
        if !(self.control_multiplier > 0.0 && self.control_multiplier.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "control_multiplier must be positive, got {}",
                self.control_multiplier
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Untrained,
    Trained,
}

/// What the engine reports for a forecasted tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Outcome {
    pub timestamp: f64,
    pub target: f64,
    pub prediction: f64,
    pub predictive_stddev: f64,
    /// EWMA statistic after this tick.
    pub statistic: f64,
    pub anomaly: bool,
}

pub struct Engine {
    config: EngineConfig,
    window: SampleWindow,
    model: Option<TrainedModel>,
    detector: SeverityDetector,
    ticks: u64,
    training_attempted: bool,
}

impl Engine {
    /// Build a fresh, untrained engine.
    pub fn configure(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let window = SampleWindow::new(config.window_len(), config.feature_count);
        let detector = SeverityDetector::new(config.decay_weight, config.control_multiplier);
        info!(
            window = config.window_len(),
            interval = config.training_interval,
            features = config.feature_count,
            w = config.decay_weight,
            l = config.control_multiplier,
            "Engine configured"
        );
        Ok(Self {
            config,
            window,
            model: None,
            detector,
            ticks: 0,
            training_attempted: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        if self.model.is_some() {
            EngineState::Trained
        } else {
            EngineState::Untrained
        }
    }

    /// Latest trained model, if any.
    pub fn current_model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn detector(&self) -> &SeverityDetector {
        &self.detector
    }

    /// Samples accepted so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn advance_raw(
        &mut self,
        timestamp: f64,
        features: &[f64],
        target: f64,
    ) -> Result<Option<Outcome>, EngineError> {
        self.advance(Sample::new(timestamp, features.to_vec(), target))
    }

    /// Process one tick. `Ok(None)` until the first model exists.
    pub fn advance(&mut self, sample: Sample) -> Result<Option<Outcome>, EngineError> {
        let timestamp = sample.timestamp;
        let target = sample.target;
        let x = sample.features.clone();

        self.window.push(sample)?;
        self.ticks += 1;

        if self.ticks % self.config.training_interval as u64 == 0 && self.window.is_full() {
            self.maybe_retrain();
        }

        let Some(model) = self.model.as_ref() else {
            return Ok(None);
        };

        let Forecast { prediction, stddev } = forecast::forecast(model, &x);
        let verdict = self.detector.update(target, prediction, stddev);
        if verdict.anomaly {
            debug!(timestamp, observed = target, prediction, z = verdict.z, "Anomalous tick");
        }

        Ok(Some(Outcome {
            timestamp,
            target,
            prediction,
            predictive_stddev: stddev,
            statistic: verdict.statistic,
            anomaly: verdict.anomaly,
        }))
    }

    fn maybe_retrain(&mut self) {
        let x = self.window.features();
        let bootstrap = !self.training_attempted;

        if !bootstrap {
            let report = conditioning::inspect(&x);
            if !report.passes() {
                debug!(
                    tick = self.ticks,
                    score = report.score,
                    rank = report.rank,
                    "Window poorly conditioned, keeping current model"
                );
                return;
            }
        }
        self.training_attempted = true;

        let y = self.window.targets();
        match model::train(&x, &y) {
            Ok(model) => {
                if self.model.is_none() {
                    info!(tick = self.ticks, "Initial model trained");
                }
                debug!(
                    tick = self.ticks,
                    alpha = model.alpha,
                    beta = model.beta,
                    iterations = model.iterations,
                    converged = model.converged,
                    "Model retrained"
                );
                self.model = Some(model);
            }
            Err(e) => {
                warn!(tick = self.ticks, "Retraining failed, keeping previous model: {}", e);
            }
        }
    }
}
