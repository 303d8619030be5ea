//! Response types of the status API

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-sensor status in the health summary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SensorHealthStatus {
    /// Latest reading succeeded
    #[serde(rename = "OK")]
    Ok,
    /// Not polled yet, or the latest reading failed
    #[serde(rename = "N/A")]
    NotAvailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorHealth {
    pub status: SensorHealthStatus,
}

/// Response for GET /healthcheck
///
/// Ages are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Time since the last successful reading of any sensor
    pub reading_age: Option<i64>,

    /// Poll interval plus the per-request timeout
    pub tolerated_age: Option<u64>,

    /// Humanized process uptime
    pub uptime: String,

    pub sensors: BTreeMap<String, SensorHealth>,
}
