use crate::analysis::Sample;
use crate::detect::engine::EngineError;
use nalgebra::{DMatrix, DVector};

/// Slots reserved up front; larger windows grow as samples arrive.
const INITIAL_RESERVE: usize = 4096;

/// Fixed-capacity ring buffer holding the most recent samples.
///
/// Slots are overwritten in place once the buffer is full. The logical order
/// (oldest to newest) is recovered from the write cursor, so the backing
/// storage order is never exposed.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    rows: Vec<Sample>,
    capacity: usize,
    feature_count: usize,
    /// Slot that the next push writes to.
    cursor: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize, feature_count: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity.min(INITIAL_RESERVE)),
            capacity,
            feature_count,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() == self.capacity
    }

    /// Insert a sample, overwriting the oldest one once full.
    ///
    /// A sample with the wrong number of features is rejected before anything
    /// is mutated.
    pub fn push(&mut self, sample: Sample) -> Result<(), EngineError> {
        if sample.feature_count() != self.feature_count {
            return Err(EngineError::FeatureCountMismatch {
                expected: self.feature_count,
                got: sample.feature_count(),
            });
        }

        if self.rows.len() < self.capacity {
            self.rows.push(sample);
        } else {
            self.rows[self.cursor] = sample;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
        Ok(())
    }

    /// Iterate samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        // Until the first wrap the cursor sits at len(), so the split is a no-op.
        let split = if self.is_full() { self.cursor } else { 0 };
        self.rows[split..].iter().chain(self.rows[..split].iter())
    }

    /// Dense `len × (m + 1)` matrix, features then target, row 0 oldest.
    pub fn as_matrix(&self) -> DMatrix<f64> {
        let m = self.feature_count;
        let mut out = DMatrix::<f64>::zeros(self.rows.len(), m + 1);
        for (i, s) in self.iter().enumerate() {
            for (j, &v) in s.features.iter().enumerate() {
                out[(i, j)] = v;
            }
            out[(i, m)] = s.target;
        }
        out
    }

    /// Feature-only sub-matrix (`len × m`), row 0 oldest.
    pub fn features(&self) -> DMatrix<f64> {
        let m = self.feature_count;
        let rows: Vec<&Sample> = self.iter().collect();
        DMatrix::from_fn(rows.len(), m, |i, j| rows[i].features[j])
    }

    /// Target column, oldest first.
    pub fn targets(&self) -> DVector<f64> {
        DVector::from_iterator(self.rows.len(), self.iter().map(|s| s.target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> Sample {
        Sample::new(i as f64, vec![i as f64, 10.0 * i as f64], 100.0 + i as f64)
    }

    #[test]
    fn test_partial_window_keeps_arrival_order() {
        let mut w = SampleWindow::new(5, 2);
        for i in 0..3 {
            w.push(sample(i)).unwrap();
        }
        assert_eq!(w.len(), 3);
        assert!(!w.is_full());

        let m = w.as_matrix();
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 3);
        for i in 0..3 {
            assert_eq!(m[(i, 0)], i as f64);
            assert_eq!(m[(i, 2)], 100.0 + i as f64);
        }
    }

    #[test]
    fn test_wraparound_reorders_oldest_first() {
        let mut w = SampleWindow::new(4, 2);
        for i in 0..11 {
            w.push(sample(i)).unwrap();
        }
        assert!(w.is_full());
        assert_eq!(w.len(), 4);

        let m = w.as_matrix();
        // Last four pushes were 7, 8, 9, 10.
        for (row, expected) in (7..11).enumerate() {
            assert_eq!(m[(row, 0)], expected as f64);
            assert_eq!(m[(row, 1)], 10.0 * expected as f64);
            assert_eq!(m[(row, 2)], 100.0 + expected as f64);
        }
        assert_eq!(w.iter().last().map(|s| s.timestamp), Some(10.0));
    }

    #[test]
    fn test_features_and_targets_agree_with_matrix() {
        let mut w = SampleWindow::new(3, 2);
        for i in 0..5 {
            w.push(sample(i)).unwrap();
        }
        let full = w.as_matrix();
        let x = w.features();
        let y = w.targets();
        assert_eq!(x.ncols(), 2);
        for i in 0..3 {
            assert_eq!(x[(i, 0)], full[(i, 0)]);
            assert_eq!(x[(i, 1)], full[(i, 1)]);
            assert_eq!(y[i], full[(i, 2)]);
        }
    }

    #[test]
    fn test_malformed_sample_rejected_without_mutation() {
        let mut w = SampleWindow::new(3, 2);
        w.push(sample(0)).unwrap();
        let before = w.as_matrix();

        let err = w.push(Sample::new(1.0, vec![1.0], 5.0)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::FeatureCountMismatch { expected: 2, got: 1 }
        ));
        assert_eq!(w.len(), 1);
        assert_eq!(w.as_matrix(), before);
    }

    #[test]
    fn test_as_matrix_does_not_mutate() {
        let mut w = SampleWindow::new(2, 2);
        for i in 0..3 {
            w.push(sample(i)).unwrap();
        }
        let a = w.as_matrix();
        let b = w.as_matrix();
        assert_eq!(a, b);
        w.push(sample(3)).unwrap();
        assert_eq!(w.as_matrix()[(0, 0)], 2.0);
    }
}
