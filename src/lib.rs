//! WattWatch -- online power forecasting and anomaly detection.
//!
//! A sliding-window Bayesian linear regression predicts the next target
//! reading from the current features, and an EWMA control chart over the
//! standardized residuals flags readings the model cannot explain.
//!
//! The crate is organised as:
//! - [`analysis`]: sample window, conditioning check, trainer, forecaster,
//!   accuracy statistics and the async run pipeline.
//! - [`detect`]: severity detector, the per-stream [`detect::engine::Engine`]
//!   and incident grading.
//! - [`ingest`]: CSV, HTTP and synthetic sample sources, input smoothing
//!   and attack injection.
//! - [`storage`]: results files and the SQLite run store.
//! - [`config`]: TOML settings.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod storage;

pub use analysis::Sample;
pub use detect::engine::{Engine, EngineConfig, EngineError, Outcome};
