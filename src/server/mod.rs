pub mod health;
pub mod routes;
pub mod sse;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::daemon::events::JobEvent;
use crate::daemon::scheduler::Scheduler;

/// Shared application state for the Axum server.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub event_tx: broadcast::Sender<JobEvent>,
    pub shutdown_tx: Option<tokio::sync::watch::Sender<()>>,
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/jobs", get(routes::list_jobs))
        .route(
            "/api/jobs/{id}",
            get(routes::get_job).patch(routes::update_job),
        )
        .route("/api/jobs/{id}/run", post(routes::run_job))
        .route("/api/events", get(sse::sse_handler))
        .route("/api/shutdown", post(routes::shutdown))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
