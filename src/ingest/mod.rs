//! Sample sources feeding the engine: CSV files, live HTTP sensors and a
//! synthetic generator, plus input smoothing and attack injection.

pub mod attack;
pub mod csv;
pub mod poll;
pub mod synthetic;

use crate::analysis::Sample;
use anyhow::Result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("input has no header row")]
    MissingHeader,

    #[error("header needs a timestamp, at least one feature and a target column, found {0} columns")]
    TooFewColumns(usize),

    #[error("EMA alpha must be in (0, 1], got {0}")]
    InvalidAlpha(f64),
}

/// Anything that yields samples one tick at a time.
#[async_trait::async_trait]
pub trait SampleSource: Send {
    /// Names of the feature columns, in order.
    fn feature_names(&self) -> &[String];

    /// Next sample, or `None` when the source is exhausted.
    async fn next_sample(&mut self) -> Result<Option<Sample>>;
}

/// Exponential smoothing of whole input rows before they reach the engine.
///
/// `avg = last + alpha·(new - last)`; `alpha = 1` passes rows through.
#[derive(Debug, Clone)]
pub struct EmaSmoother {
    alpha: f64,
    last: Option<(Vec<f64>, f64)>,
}

impl EmaSmoother {
    pub fn new(alpha: f64) -> Result<Self, IngestError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(IngestError::InvalidAlpha(alpha));
        }
        Ok(Self { alpha, last: None })
    }

    pub fn smooth(&mut self, sample: Sample) -> Sample {
        if self.alpha >= 1.0 {
            return sample;
        }
        let a = self.alpha;
        let (features, target) = match self.last.take() {
            Some((prev_f, prev_t)) if prev_f.len() == sample.features.len() => {
                let f = prev_f
                    .iter()
                    .zip(sample.features.iter())
                    .map(|(p, n)| p + a * (n - p))
                    .collect::<Vec<_>>();
                (f, prev_t + a * (sample.target - prev_t))
            }
            _ => (sample.features, sample.target),
        };
        self.last = Some((features.clone(), target));
        Sample::new(sample.timestamp, features, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_one_is_identity() {
        let mut s = EmaSmoother::new(1.0).unwrap();
        let a = Sample::new(0.0, vec![1.0], 10.0);
        let b = Sample::new(1.0, vec![3.0], 30.0);
        assert_eq!(s.smooth(a.clone()), a);
        assert_eq!(s.smooth(b.clone()), b);
    }

    #[test]
    fn test_smoothing_blends_with_previous_row() {
        let mut s = EmaSmoother::new(0.5).unwrap();
        s.smooth(Sample::new(0.0, vec![0.0, 10.0], 100.0));
        let out = s.smooth(Sample::new(60.0, vec![4.0, 20.0], 200.0));
        assert_eq!(out.features, vec![2.0, 15.0]);
        assert_eq!(out.target, 150.0);
        assert_eq!(out.timestamp, 60.0);

        let out = s.smooth(Sample::new(120.0, vec![2.0, 15.0], 150.0));
        assert_eq!(out.features, vec![2.0, 15.0]);
        assert_eq!(out.target, 150.0);
    }

    #[test]
    fn test_rejects_invalid_alpha() {
        assert!(EmaSmoother::new(0.0).is_err());
        assert!(EmaSmoother::new(1.5).is_err());
        assert!(EmaSmoother::new(f64::NAN).is_err());
    }
}
