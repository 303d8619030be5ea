//! Sensor readings and the client that fetches them
//!
//! A sensor exposes its latest sample at `/current-sample`. Every poll is a
//! single bounded GET whose outcome is classified into a [`Reading`]:
//!
//! - **Success** (200): the body parsed as a [`CurrentSample`]
//! - **Timeout** (504): no complete response within [`SENSOR_QUERY_TIMEOUT`]
//! - **Error** (500): anything else (refused connection, bad status, bad JSON)

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::config::SensorConfig;

/// Budget for one sensor request. Shorter than any sane poll interval.
pub const SENSOR_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

const CONSUMPTION_SUFFIX: &str = "_CONSUMPTION";

/// Body of a successful `/current-sample` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSample {
    #[serde(rename = "sensorId")]
    pub sensor_id: String,

    /// Sensor-side timestamp, passed through as reported
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub channels: Vec<Channel>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One measured circuit
///
/// Only the type and channel number are interpreted. Measurements stay as
/// the sensor reported them and are republished unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "type")]
    pub channel_type: String,

    pub ch: u32,

    /// `eImp_Ws`, `p_W`, `v_V` and whatever else the sensor sends
    #[serde(flatten)]
    pub measurements: serde_json::Map<String, serde_json::Value>,
}

impl Channel {
    pub fn new(channel_type: impl Into<String>, ch: u32) -> Self {
        Self {
            channel_type: channel_type.into(),
            ch,
            measurements: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.measurements.insert(field.to_string(), value.into());
        self
    }

    /// Numeric value of `field`, if present and a number.
    pub fn measurement(&self, field: &str) -> Option<&serde_json::Number> {
        match self.measurements.get(field)? {
            serde_json::Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Channel type as used in topic names (`MAIN_CONSUMPTION` -> `MAIN`).
    pub fn topic_type(&self) -> &str {
        topic_type(&self.channel_type)
    }
}

pub fn topic_type(channel_type: &str) -> &str {
    channel_type
        .strip_suffix(CONSUMPTION_SUFFIX)
        .unwrap_or(channel_type)
}

/// Outcome of polling one sensor
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(CurrentSample),
    Timeout { endpoint: String },
    Error { cause: String },
}

impl Outcome {
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Success(_) => 200,
            Outcome::Timeout { .. } => 504,
            Outcome::Error { .. } => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn message(&self) -> Option<String> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Timeout { endpoint } => Some(format!("sensor API not reachable at {endpoint}")),
            Outcome::Error { cause } => Some(cause.clone()),
        }
    }
}

/// Result of polling one sensor in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Configured sensor name
    pub name: String,

    pub model: Option<String>,

    /// When the bridge finished the request
    pub polled_at: DateTime<Utc>,

    pub outcome: Outcome,
}

impl Reading {
    pub fn new(sensor: &SensorConfig, outcome: Outcome) -> Self {
        Self {
            name: sensor.name.clone(),
            model: sensor.device_model.clone(),
            polled_at: Utc::now(),
            outcome,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.outcome.status_code()
    }

    pub fn sample(&self) -> Option<&CurrentSample> {
        match &self.outcome {
            Outcome::Success(sample) => Some(sample),
            _ => None,
        }
    }
}

impl Serialize for Reading {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Reading", 5)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("model", &self.model)?;
        state.serialize_field("status", &self.status_code())?;
        match &self.outcome {
            Outcome::Success(sample) => state.serialize_field("content", sample)?,
            other => state.serialize_field("content", &other.message())?,
        }
        state.serialize_field("polled_at", &self.polled_at.to_rfc3339())?;
        state.end()
    }
}

/// Fetches samples from sensors.
///
/// The underlying HTTP client is shared across sensors and cycles.
#[derive(Debug, Clone)]
pub struct SensorClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl SensorClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(SENSOR_QUERY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build sensor HTTP client")?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll a sensor once. Never fails; failures are part of the reading.
    #[instrument(skip(self, sensor), fields(sensor = %sensor.name))]
    pub async fn fetch(&self, sensor: &SensorConfig) -> Reading {
        let url = sensor.sample_url();
        trace!("requesting sample from {url}");

        let outcome = match tokio::time::timeout(self.timeout, self.request(&url)).await {
            Ok(Ok(sample)) => Outcome::Success(sample),
            Ok(Err(e)) if is_timeout(&e) => Outcome::Timeout { endpoint: url },
            Ok(Err(e)) => Outcome::Error {
                cause: format!("{e:#}"),
            },
            Err(_) => Outcome::Timeout { endpoint: url },
        };

        trace!("sensor answered with status {}", outcome.status_code());

        Reading::new(sensor, outcome)
    }

    async fn request(&self, url: &str) -> Result<CurrentSample> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to send HTTP request")?;

        if response.status() != reqwest::StatusCode::OK {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response
            .json::<CurrentSample>()
            .await
            .context("failed to parse sample JSON")
    }
}

fn is_timeout(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(reqwest::Error::is_timeout)
}
