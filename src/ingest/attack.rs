//! Synthetic attack injection for exercising the detector.
//!
//! An attack adds a constant load to the target over a time interval. The
//! attacked timestamps double as ground truth when scoring detections.

use crate::analysis::Sample;
use crate::ingest::csv::parse_timestamp;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attack {
    /// Epoch seconds.
    pub start: f64,
    pub minutes: f64,
    /// Load added to the target while the attack is active.
    pub watts: f64,
}

impl Attack {
    pub fn end(&self) -> f64 {
        self.start + 60.0 * self.minutes
    }

    /// Active on `[start, end)`.
    pub fn covers(&self, timestamp: f64) -> bool {
        timestamp >= self.start && timestamp < self.end()
    }
}

impl FromStr for Attack {
    type Err = String;

    /// `START,MINUTES,WATTS` where START is epoch seconds or a datetime.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(format!("expected START,MINUTES,WATTS, got '{}'", s));
        }
        let start = parse_timestamp(parts[0])
            .ok_or_else(|| format!("invalid attack start '{}'", parts[0]))?;
        let minutes: f64 = parts[1]
            .parse()
            .map_err(|_| format!("invalid attack duration '{}'", parts[1]))?;
        let watts: f64 = parts[2]
            .parse()
            .map_err(|_| format!("invalid attack intensity '{}'", parts[2]))?;
        if !(minutes > 0.0) {
            return Err("attack duration must be positive".to_string());
        }
        Ok(Attack {
            start,
            minutes,
            watts,
        })
    }
}

/// Raise the sample's target by every attack covering its timestamp.
/// Returns whether any attack applied.
pub fn apply(attacks: &[Attack], sample: &mut Sample) -> bool {
    let mut hit = false;
    for a in attacks.iter().filter(|a| a.covers(sample.timestamp)) {
        sample.target += a.watts;
        hit = true;
    }
    hit
}

/// Timestamps (whole seconds) of the given ticks covered by any attack.
pub fn ground_truth(attacks: &[Attack], timestamps: impl IntoIterator<Item = f64>) -> BTreeSet<i64> {
    timestamps
        .into_iter()
        .filter(|&t| attacks.iter().any(|a| a.covers(t)))
        .map(|t| t as i64)
        .collect()
}

/// Copy a telemetry CSV, adding the attacks to the target (last) column.
/// Returns the number of rows altered.
pub fn inject_file(input: &Path, output: &Path, attacks: &[Attack]) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(input)
        .with_context(|| format!("failed to open input file: {}", input.display()))?;
    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("failed to create attack file: {}", output.display()))?;

    writer.write_record(reader.headers()?)?;

    let mut altered = 0;
    for record in reader.records() {
        let record = record?;
        let mut cells: Vec<String> = record.iter().map(str::to_string).collect();

        let timestamp = cells.first().and_then(|c| parse_timestamp(c.trim()));
        let target = cells.last().and_then(|c| c.trim().parse::<f64>().ok());

        if let (Some(ts), Some(mut target)) = (timestamp, target) {
            let mut hit = false;
            for a in attacks.iter().filter(|a| a.covers(ts)) {
                target += a.watts;
                hit = true;
            }
            if hit {
                if let Some(last) = cells.last_mut() {
                    *last = target.to_string();
                }
                altered += 1;
            }
        }
        writer.write_record(&cells)?;
    }
    writer.flush()?;

    info!(rows = altered, output = %output.display(), "Attack file written");
    Ok(altered)
}
