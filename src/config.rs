//! TOML configuration.
//!
//! Settings are layered: compiled-in defaults, then a config file found via
//! an explicit path, the `WATTWATCH_CONFIG` environment variable or
//! `./wattwatch.toml`, then command-line overrides applied by the caller.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::anomaly::SeverityPreset;
use crate::detect::engine::EngineConfig;
use crate::detect::incident::DEFAULT_BLOCK;

pub const CONFIG_ENV: &str = "WATTWATCH_CONFIG";
pub const LOCAL_CONFIG: &str = "wattwatch.toml";

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub severity: SeveritySettings,
    #[serde(default)]
    pub smoothing: SmoothingSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

impl Settings {
    /// Load settings from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(settings)
    }

    /// Resolve settings. An explicit path must load; the env var and the
    /// local file fall back to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            match Self::load(&path) {
                Ok(s) => return Ok(s),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, trying fallback",
                        CONFIG_ENV
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(s) => return Ok(s),
                Err(e) => {
                    warn!(path = %local.display(), error = %e, "local config could not be loaded, using defaults");
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Engine parameters for a stream with `feature_count` features.
    pub fn engine_config(&self, feature_count: usize) -> EngineConfig {
        let (decay_weight, control_multiplier) = self.severity.params();
        EngineConfig {
            granularity_minutes: self.engine.granularity_minutes,
            training_window: self.engine.training_window,
            training_interval: self.engine.training_interval,
            feature_count,
            decay_weight,
            control_multiplier,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Minutes between samples.
    pub granularity_minutes: u32,
    /// Window length in retraining intervals.
    pub training_window: usize,
    /// Ticks per retraining interval.
    pub training_interval: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        // One day of minute samples, retrained hourly.
        Self {
            granularity_minutes: 1,
            training_window: 24,
            training_interval: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// EWMA chart tuning. Explicit `decay_weight`/`control_multiplier` win over
/// the preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeveritySettings {
    pub preset: SeverityPreset,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_multiplier: Option<f64>,
}

impl Default for SeveritySettings {
    fn default() -> Self {
        Self {
            preset: SeverityPreset::Balanced,
            decay_weight: None,
            control_multiplier: None,
        }
    }
}

impl SeveritySettings {
    pub fn params(&self) -> (f64, f64) {
        let (w, l) = self.preset.params();
        (
            self.decay_weight.unwrap_or(w),
            self.control_multiplier.unwrap_or(l),
        )
    }
}

// ---------------------------------------------------------------------------
// Smoothing / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingSettings {
    /// Input EMA weight in (0, 1]; 1 disables smoothing.
    pub ema_alpha: f64,
}

impl Default for SmoothingSettings {
    fn default() -> Self {
        Self { ema_alpha: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Ticks per incident block.
    pub incident_block: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            incident_block: DEFAULT_BLOCK,
        }
    }
}
