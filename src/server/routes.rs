use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::errors::IngestError;
use crate::models::{JobConfigUpdate, JobSummary};

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Map a control-surface error onto its HTTP status and error code.
pub fn ingest_error_response(err: &IngestError) -> Response {
    let (status, code) = match err {
        IngestError::JobNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        IngestError::JobBusy(_) => (StatusCode::CONFLICT, "job_busy"),
        IngestError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
        IngestError::SchedulerStopped => (StatusCode::SERVICE_UNAVAILABLE, "scheduler_stopped"),
        IngestError::Validation(_) | IngestError::Cron(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "validation_error")
        }
        IngestError::Config(_) | IngestError::Storage(_) | IngestError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };
    if status.is_server_error() {
        tracing::error!("{}", err);
    } else {
        tracing::warn!("{}", err);
    }
    error_response(status, code, &err.to_string())
}

// ---------------------------------------------------------------------------
// Query params
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ListJobsParams {
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RunJobParams {
    /// Hold the response until the run finishes and return its outcome.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub job_id: String,
    pub run_id: uuid::Uuid,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> impl IntoResponse {
    let jobs: Vec<JobSummary> = state
        .scheduler
        .jobs_status()
        .into_iter()
        .filter(|job| params.enabled.map_or(true, |enabled| job.enabled == enabled))
        .collect();
    tracing::debug!("Listing {} jobs", jobs.len());
    Json(jobs)
}

/// GET /api/jobs/{id}
pub async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.scheduler.job_status(&id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => ingest_error_response(&e),
    }
}

/// PATCH /api/jobs/{id}
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<JobConfigUpdate>,
) -> Response {
    match state.scheduler.update_job_config(&id, &update) {
        Ok(job) => Json(job).into_response(),
        Err(e) => ingest_error_response(&e),
    }
}

/// POST /api/jobs/{id}/run
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<RunJobParams>,
) -> Response {
    let handle = match state.scheduler.run_job_manually(&id) {
        Ok(handle) => handle,
        Err(e) => return ingest_error_response(&e),
    };
    tracing::info!("Manual run {} of '{}' accepted", handle.run_id, id);

    if params.wait {
        return match handle.wait().await {
            Ok(outcome) => Json(outcome).into_response(),
            Err(e) => ingest_error_response(&e),
        };
    }

    (
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            job_id: handle.job_id,
            run_id: handle.run_id,
        }),
    )
        .into_response()
}

/// POST /api/shutdown
pub async fn shutdown(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested");

    if let Some(ref tx) = state.shutdown_tx {
        let _ = tx.send(());
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Shutdown initiated",
        })),
    )
}
