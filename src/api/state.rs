//! API shared state

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SharedConfig;
use crate::discovery::DiscoveryBuilder;
use crate::snapshot::ReadingsStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Latest readings, written by the poller
    pub store: Arc<ReadingsStore>,

    /// Current configuration (swapped on reload)
    pub config: SharedConfig,

    pub discovery: DiscoveryBuilder,

    /// Per-request budget of the sensor client
    pub sensor_timeout: Duration,

    pub started: Instant,
}

impl ApiState {
    pub fn new(
        store: Arc<ReadingsStore>,
        config: SharedConfig,
        discovery: DiscoveryBuilder,
        sensor_timeout: Duration,
    ) -> Self {
        Self {
            store,
            config,
            discovery,
            sensor_timeout,
            started: Instant::now(),
        }
    }
}
