use crate::detect::engine::Outcome;
use crate::detect::{Incident, Severity};

/// Anything with a timestamp and an anomaly verdict.
pub trait Flagged {
    fn timestamp(&self) -> f64;
    fn anomaly(&self) -> bool;
}

impl Flagged for Outcome {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn anomaly(&self) -> bool {
        self.anomaly
    }
}

/// Default number of ticks per incident block.
pub const DEFAULT_BLOCK: usize = 10;

/// Group outcomes into fixed blocks of `block` ticks and grade each block by
/// how many of its ticks were anomalous.
///
/// More than two thirds of the block is `Critical`, more than a third is
/// `Warning`, anything else with at least one anomaly is `Info`. Quiet
/// blocks are omitted. A trailing partial block is graded against the full
/// block size.
pub fn summarize<T: Flagged>(ticks: &[T], block: usize) -> Vec<Incident> {
    let block = block.max(1);
    ticks
        .chunks(block)
        .filter_map(|chunk| {
            let anomaly_count = chunk.iter().filter(|t| t.anomaly()).count();
            let severity = grade(anomaly_count, block)?;
            Some(Incident {
                severity,
                start: chunk.first()?.timestamp(),
                end: chunk.last()?.timestamp(),
                ticks: chunk.len(),
                anomaly_count,
            })
        })
        .collect()
}

fn grade(anomaly_count: usize, block: usize) -> Option<Severity> {
    let high = 2.0 * block as f64 / 3.0;
    let mid = block as f64 / 3.0;
    let c = anomaly_count as f64;
    if c > high {
        Some(Severity::Critical)
    } else if c > mid {
        Some(Severity::Warning)
    } else if anomaly_count > 0 {
        Some(Severity::Info)
    } else {
        None
    }
}
