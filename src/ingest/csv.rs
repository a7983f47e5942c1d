//! CSV telemetry reader.
//!
//! Layout: first column timestamp, last column target, everything between is
//! a feature. Timestamps are epoch seconds or `%Y-%m-%d %H:%M:%S`.
//!
//! Datetime strings are read as UTC, not the host's local zone, so the same
//! file yields the same epoch seconds on every machine. Convert local
//! exports to UTC (or to epoch seconds) before analysis.

use crate::analysis::Sample;
use crate::ingest::{IngestError, SampleSource};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CsvSource {
    reader: csv::Reader<Box<dyn Read + Send>>,
    feature_names: Vec<String>,
    record: csv::StringRecord,
    line: u64,
    skipped: u64,
}

impl CsvSource {
    /// Open a file, or standard input when `path` is `-`.
    pub fn open(path: &Path) -> Result<Self> {
        let input: Box<dyn Read + Send> = if path.as_os_str() == "-" {
            Box::new(std::io::stdin())
        } else {
            let file = File::open(path)
                .with_context(|| format!("failed to open input file: {}", path.display()))?;
            Box::new(file)
        };
        Self::from_reader(input)
    }

    pub fn from_reader(input: Box<dyn Read + Send>) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(input);

        let headers = reader.headers().context("failed to read CSV header")?.clone();
        if headers.is_empty() {
            return Err(IngestError::MissingHeader.into());
        }
        if headers.len() < 3 {
            return Err(IngestError::TooFewColumns(headers.len()).into());
        }
        let feature_names = headers
            .iter()
            .skip(1)
            .take(headers.len() - 2)
            .map(str::to_string)
            .collect();

        Ok(Self {
            reader,
            feature_names,
            record: csv::StringRecord::new(),
            line: 1,
            skipped: 0,
        })
    }

    /// Rows dropped because they could not be parsed.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Read the next well-formed row, skipping malformed ones.
    pub fn read_sample(&mut self) -> Result<Option<Sample>> {
        loop {
            if !self
                .reader
                .read_record(&mut self.record)
                .context("failed to read CSV record")?
            {
                return Ok(None);
            }
            self.line += 1;

            match parse_record(&self.record, self.feature_names.len()) {
                Some(sample) => return Ok(Some(sample)),
                None => {
                    self.skipped += 1;
                    warn!(line = self.line, "Skipping malformed CSV row");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl SampleSource for CsvSource {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    async fn next_sample(&mut self) -> Result<Option<Sample>> {
        self.read_sample()
    }
}

/// Parse a timestamp cell as epoch seconds or a UTC datetime string.
pub fn parse_timestamp(cell: &str) -> Option<f64> {
    if let Ok(v) = cell.parse::<f64>() {
        return v.is_finite().then_some(v);
    }
    NaiveDateTime::parse_from_str(cell, DATE_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp() as f64)
}

fn parse_record(record: &csv::StringRecord, feature_count: usize) -> Option<Sample> {
    if record.len() != feature_count + 2 {
        return None;
    }
    let timestamp = parse_timestamp(record.get(0)?)?;
    let mut values = Vec::with_capacity(feature_count + 1);
    for cell in record.iter().skip(1) {
        let v: f64 = cell.parse().ok()?;
        if !v.is_finite() {
            return None;
        }
        values.push(v);
    }
    let target = values.pop()?;
    Some(Sample::new(timestamp, values, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &'static str) -> Result<CsvSource> {
        CsvSource::from_reader(Box::new(text.as_bytes()))
    }

    #[test]
    fn test_reads_features_and_target() {
        let mut src = source("time,temp,light,power\n100,20.5,3,900\n160,21.0,4,950\n").unwrap();
        assert_eq!(src.feature_names(), &["temp".to_string(), "light".to_string()]);

        let s = src.read_sample().unwrap().unwrap();
        assert_eq!(s.timestamp, 100.0);
        assert_eq!(s.features, vec![20.5, 3.0]);
        assert_eq!(s.target, 900.0);

        assert!(src.read_sample().unwrap().is_some());
        assert!(src.read_sample().unwrap().is_none());
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let mut src =
            source("time,a,power\n1,2,3\nbad,2,3\n4,5\n7,x,9\n10,11,12\n").unwrap();
        assert_eq!(src.read_sample().unwrap().unwrap().timestamp, 1.0);
        assert_eq!(src.read_sample().unwrap().unwrap().timestamp, 10.0);
        assert!(src.read_sample().unwrap().is_none());
        assert_eq!(src.skipped(), 3);
    }

    #[test]
    fn test_rejects_narrow_header() {
        assert!(source("time,power\n1,2\n").is_err());
    }

    #[test]
    fn test_datetime_timestamps() {
        // Datetimes are UTC regardless of the host time zone.
        assert_eq!(parse_timestamp("1970-01-01 00:01:00"), Some(60.0));
        assert_eq!(parse_timestamp("2016-06-01 06:49:15"), Some(1464763755.0));
        assert_eq!(parse_timestamp("1464763755"), Some(1464763755.0));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[tokio::test]
    async fn test_async_source_interface() {
        let mut src = source("t,a,y\n1,2,3\n").unwrap();
        let s = src.next_sample().await.unwrap().unwrap();
        assert_eq!(s.features, vec![2.0]);
        assert!(src.next_sample().await.unwrap().is_none());
    }
}
