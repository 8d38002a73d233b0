use anyhow::Result;
use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::api::rotation;
use crate::state::AppState;

/// Create the management API router with all routes
pub fn create_api_server(bind_addr: &str, state: AppState) -> Result<(SocketAddr, Router)> {
    let addr: SocketAddr = bind_addr.parse()?;

    let app = Router::new()
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/lease", get(rotation::get_lease))
        .route("/api/v1/rotation", get(rotation::get_rotation))
        .route("/api/v1/rotation/recover", post(rotation::recover))
        .route("/api/v1/metrics", get(metrics_handler))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive());

    info!("API server configured to bind on {}", addr);

    Ok((addr, app))
}

/// Run the API server
pub async fn run_api_server(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Prometheus metrics endpoint
///
/// Hook runs happen in other processes, so their counts are picked up from
/// the rotation record on every scrape.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.orchestrator.store().load().await {
        Ok(record) => {
            state.metrics.set_state(record.state);
            state.metrics.sync_hook_runs(&record.hook_runs);
        }
        Err(e) => warn!("Failed to load rotation record for metrics: {:#}", e),
    }
    Response::new(axum::body::Body::from(state.metrics.export_metrics()))
}
