//! Discovery endpoint

use std::collections::BTreeMap;

use axum::{Json, extract::State};

use crate::{api::state::ApiState, discovery::Descriptor};

/// GET /discovery
///
/// Builds the discovery descriptors for the current snapshot, keyed by topic
pub async fn get_discovery(State(state): State<ApiState>) -> Json<BTreeMap<String, Descriptor>> {
    let config = state.config.load_full();
    let snapshot = state.store.snapshot();

    Json(state.discovery.build(&config, &snapshot).await)
}
