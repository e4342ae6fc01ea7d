use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::models::{HealthStatus, JobHealthSnapshot};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub snapshot: JobHealthSnapshot,
    pub version: String,
}

/// GET /health: 200 while healthy, 503 when unhealthy or stopped.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.scheduler.health();
    tracing::debug!("Health check: {:?}", snapshot.status);

    let status = match snapshot.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy | HealthStatus::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        snapshot,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status, Json(response))
}
