//! HTTP status API of the bridge
//!
//! Read-only view onto the poller's latest snapshot.
//!
//! ## Endpoints
//!
//! - `GET /readings` - Latest reading of every sensor
//! - `GET /discovery` - Home Assistant discovery descriptors, keyed by topic
//! - `GET /healthcheck` - Reading age, tolerated age, uptime and sensor states

pub mod routes;
pub mod state;
pub mod types;

pub use state::ApiState;
pub use types::{HealthResponse, SensorHealth, SensorHealthStatus};

use std::net::SocketAddr;

use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Allow cross-origin requests (e.g. from a dashboard)
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            enable_cors: false,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/readings", get(routes::readings::get_readings))
        .route("/discovery", get(routes::discovery::get_discovery))
        .route("/healthcheck", get(routes::health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let mut app = router(state);

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
