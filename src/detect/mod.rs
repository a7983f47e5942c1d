//! Anomaly detection and incident grouping.

pub mod anomaly;
pub mod engine;
pub mod incident;

/// Severity levels for detected incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A stretch of ticks with at least one anomaly.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Incident {
    pub severity: Severity,
    /// Timestamp of the first tick in the block.
    pub start: f64,
    /// Timestamp of the last tick in the block.
    pub end: f64,
    pub ticks: usize,
    pub anomaly_count: usize,
}
