//! Results files: `Timestamp,Target,Prediction,Anomaly`.
//!
//! ```text
//! Timestamp,Target,Prediction,Anomaly
//! 1464763755,9530,26466,0
//! ```
//! Older files without the `Anomaly` column are still readable.

use crate::detect::engine::Outcome;
use crate::detect::incident::Flagged;
use crate::detect::Incident;
use crate::ingest::csv::parse_timestamp;
use crate::storage::OutcomeSink;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::path::Path;

pub const HEADER: [&str; 4] = ["Timestamp", "Target", "Prediction", "Anomaly"];

/// One row of a results file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResultRow {
    pub timestamp: f64,
    pub target: f64,
    pub prediction: f64,
    /// `None` for three-column files.
    pub anomaly: Option<bool>,
}

impl From<&Outcome> for ResultRow {
    fn from(o: &Outcome) -> Self {
        Self {
            timestamp: o.timestamp,
            target: o.target,
            prediction: o.prediction,
            anomaly: Some(o.anomaly),
        }
    }
}

impl Flagged for ResultRow {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn anomaly(&self) -> bool {
        self.anomaly.unwrap_or(false)
    }
}

/// Streams outcomes into a results CSV.
pub struct CsvResultWriter {
    writer: csv::Writer<File>,
    rows: usize,
}

impl CsvResultWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create results file: {}", path.display()))?;
        writer.write_record(HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl OutcomeSink for CsvResultWriter {
    fn record(&mut self, outcome: &Outcome) -> Result<()> {
        self.writer.write_record(&[
            outcome.timestamp.to_string(),
            outcome.target.to_string(),
            outcome.prediction.to_string(),
            (outcome.anomaly as u8).to_string(),
        ])?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self, _incidents: &[Incident]) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read a results file written by [`CsvResultWriter`] (or a 3-column one).
pub fn read_results(path: &Path) -> Result<Vec<ResultRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open results file: {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let line = i + 2;
        let cell = |idx: usize| {
            record
                .get(idx)
                .with_context(|| format!("line {}: missing column {}", line, idx + 1))
        };
        let number = |idx: usize| -> Result<f64> {
            let c = cell(idx)?;
            c.parse::<f64>()
                .with_context(|| format!("line {}: invalid number '{}'", line, c))
        };

        let ts = cell(0)?;
        let timestamp = parse_timestamp(ts)
            .with_context(|| format!("line {}: invalid timestamp '{}'", line, ts))?;

        let anomaly = match record.get(3) {
            Some(cell) if !cell.is_empty() => {
                let v: f64 = cell
                    .parse()
                    .with_context(|| format!("line {}: invalid anomaly flag '{}'", line, cell))?;
                Some(v != 0.0)
            }
            _ => None,
        };

        rows.push(ResultRow {
            timestamp,
            target: number(1)?,
            prediction: number(2)?,
            anomaly,
        });
    }
    Ok(rows)
}
