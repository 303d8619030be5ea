//! Health check endpoint

use std::time::Duration;

use axum::{Json, extract::State};
use chrono::Utc;

use crate::api::{
    state::ApiState,
    types::{HealthResponse, SensorHealth, SensorHealthStatus},
};

/// GET /healthcheck
///
/// Reports how old the last successful reading is, how old it may get, the
/// process uptime and the state of every configured sensor.
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(health_summary(&state))
}

pub fn health_summary(state: &ApiState) -> HealthResponse {
    let config = state.config.load();
    let snapshot = state.store.snapshot();

    let reading_age = state
        .store
        .last_reading()
        .map(|last| (Utc::now() - last).num_milliseconds());

    let tolerated_age = config
        .sensors
        .query_interval()
        .map(|interval| (interval + state.sensor_timeout).as_millis() as u64);

    let uptime = Duration::from_secs(state.started.elapsed().as_secs());

    let sensors = config
        .registry()
        .iter()
        .map(|sensor| {
            let status = match snapshot.get(&sensor.name) {
                Some(reading) if reading.outcome.is_success() => SensorHealthStatus::Ok,
                _ => SensorHealthStatus::NotAvailable,
            };
            (sensor.name.clone(), SensorHealth { status })
        })
        .collect();

    HealthResponse {
        reading_age,
        tolerated_age,
        uptime: humantime::format_duration(uptime).to_string(),
        sensors,
    }
}
