use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};
use tracing::{error, info};

use crate::error::RotationError;
use crate::lease::LeaseStatus;
use crate::rotation::{RecoveryOutcome, RotationRecord};
use crate::state::AppState;

/// GET /api/v1/lease - Lease currently on disk
pub async fn get_lease(State(state): State<AppState>) -> Result<Json<LeaseStatus>, StatusCode> {
    let status = state.orchestrator.status().await.map_err(|e| {
        error!("Failed to read rotation status: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match status.lease {
        Some(lease) => {
            state.metrics.set_state(status.record.state);
            Ok(Json(lease))
        }
        None => {
            info!(
                "No lease on disk: {}",
                status.lease_error.unwrap_or_default()
            );
            Err(StatusCode::NOT_FOUND)
        }
    }
}

/// GET /api/v1/rotation - Persisted renewal state
pub async fn get_rotation(
    State(state): State<AppState>,
) -> Result<Json<RotationRecord>, StatusCode> {
    let record = state.orchestrator.store().load().await.map_err(|e| {
        error!("Failed to load rotation record: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    state.metrics.set_state(record.state);
    Ok(Json(record))
}

/// POST /api/v1/rotation/recover - Restore services now, ignoring the outage limit
pub async fn recover(
    State(state): State<AppState>,
) -> Result<Json<RecoveryOutcome>, (StatusCode, String)> {
    info!("Manual recovery requested");

    match state.orchestrator.recover(true).await {
        Ok(outcome) => {
            state.metrics.record_recovery(&outcome);
            Ok(Json(outcome))
        }
        Err(e) => {
            error!("Manual recovery failed: {}", e);
            state.metrics.record_hook("recover", "error");
            if let RotationError::ReloadFailed { failures } = &e {
                for failure in failures {
                    state.metrics.record_reload_failure(&failure.service);
                }
            }
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}
