//! Readings endpoint

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::{api::state::ApiState, snapshot::ReadingsSnapshot};

/// GET /readings
///
/// Returns the snapshot of the last completed cycle as is
pub async fn get_readings(State(state): State<ApiState>) -> Json<Arc<ReadingsSnapshot>> {
    Json(state.store.snapshot())
}
