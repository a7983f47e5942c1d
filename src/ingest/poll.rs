//! Live sensor polling over HTTP.
//!
//! The endpoint returns one JSON reading per request:
//! `{"timestamp": 1464763755, "features": [..], "target": 9530, "names": [..]}`.
//! `timestamp` and `names` are optional. One request is issued per tick of
//! the sampling granularity.

use crate::analysis::Sample;
use crate::ingest::SampleSource;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct SensorReading {
    #[serde(default)]
    pub timestamp: Option<f64>,
    pub features: Vec<f64>,
    pub target: f64,
    #[serde(default)]
    pub names: Option<Vec<String>>,
}

impl SensorReading {
    fn into_sample(self, now: f64) -> Sample {
        Sample::new(self.timestamp.unwrap_or(now), self.features, self.target)
    }
}

pub struct HttpPoller {
    client: reqwest::Client,
    url: String,
    period: Duration,
    next_tick: Instant,
    feature_names: Vec<String>,
    pending: Option<Sample>,
    max_ticks: Option<u64>,
    polled: u64,
}

impl HttpPoller {
    /// Probe the endpoint once to learn the feature layout. The probe reading
    /// is returned as the first sample.
    ///
    /// With `align`, later ticks land on multiples of `period` since the epoch.
    pub async fn connect(url: &str, period: Duration, align: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(period.min(Duration::from_secs(30)).max(Duration::from_secs(1)))
            .build()
            .context("failed to build HTTP client")?;

        let reading = fetch(&client, url)
            .await
            .with_context(|| format!("initial poll of {} failed", url))?;

        let feature_names = match &reading.names {
            Some(names) if names.len() == reading.features.len() => names.clone(),
            _ => (0..reading.features.len())
                .map(|i| format!("feature_{}", i))
                .collect(),
        };
        info!(%url, features = feature_names.len(), "Connected to sensor endpoint");

        let wait = if align {
            until_aligned(epoch_now(), period)
        } else {
            period
        };

        Ok(Self {
            client,
            url: url.to_string(),
            period,
            next_tick: Instant::now() + wait,
            feature_names,
            pending: Some(reading.into_sample(epoch_now())),
            max_ticks: None,
            polled: 1,
        })
    }

    /// Stop after this many readings (including the probe).
    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }
}

#[async_trait::async_trait]
impl SampleSource for HttpPoller {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    async fn next_sample(&mut self) -> Result<Option<Sample>> {
        if let Some(sample) = self.pending.take() {
            return Ok(Some(sample));
        }

        loop {
            if self.max_ticks.is_some_and(|max| self.polled >= max) {
                return Ok(None);
            }

            tokio::time::sleep_until(self.next_tick).await;
            self.next_tick += self.period;
            self.polled += 1;

            match fetch(&self.client, &self.url).await {
                Ok(reading) if reading.features.len() != self.feature_names.len() => {
                    warn!(
                        url = %self.url,
                        expected = self.feature_names.len(),
                        got = reading.features.len(),
                        "Sensor reading has wrong feature count, retrying next tick"
                    );
                }
                Ok(reading) => {
                    debug!(value = reading.target, "Sensor reading");
                    return Ok(Some(reading.into_sample(epoch_now())));
                }
                Err(e) => {
                    warn!(url = %self.url, "Sensor poll failed, retrying next tick: {:#}", e);
                }
            }
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<SensorReading> {
    let reading = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<SensorReading>()
        .await?;
    Ok(reading)
}

fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Time from `now` (epoch seconds) to the next multiple of `period`.
pub fn until_aligned(now: f64, period: Duration) -> Duration {
    let p = period.as_secs_f64();
    if p <= 0.0 {
        return Duration::ZERO;
    }
    let rem = now.rem_euclid(p);
    Duration::from_secs_f64(p - rem)
}
