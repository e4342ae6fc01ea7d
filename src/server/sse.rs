use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::AppState;
use crate::daemon::events::JobEvent;

#[derive(Debug, Deserialize, Default)]
pub struct SseParams {
    pub job_id: Option<String>,
}

/// Guard that logs at debug level when the SSE stream is dropped (client disconnects).
struct SseDropGuard;

impl Drop for SseDropGuard {
    fn drop(&mut self) {
        tracing::debug!("SSE client disconnected");
    }
}

fn event_name(event: &JobEvent) -> &'static str {
    match event {
        JobEvent::Started { .. } => "started",
        JobEvent::Completed { .. } => "completed",
        JobEvent::HealthCheck(_) => "health_check",
        JobEvent::Notification { .. } => "notification",
    }
}

/// GET /api/events: live `JobEvent` stream, optionally filtered to one job.
/// Health checks carry no job id and always pass the filter.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SseParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("SSE client connected");

    let rx = state.event_tx.subscribe();
    let filter_job_id = params.job_id;
    let _drop_guard = SseDropGuard;

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let _ = &_drop_guard;
        match result {
            Ok(event) => {
                if let (Some(wanted), Some(job_id)) = (filter_job_id.as_deref(), event.job_id()) {
                    if wanted != job_id {
                        return None;
                    }
                }
                match serde_json::to_string(&event) {
                    Ok(data) => Some(Ok(Event::default().event(event_name(&event)).data(data))),
                    Err(_) => None,
                }
            }
            Err(_) => Some(Ok(
                Event::default().comment("lagged: some events were missed")
            )),
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::events::{NotificationKind, RunTrigger};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_event_names() {
        let started = JobEvent::Started {
            job_id: "a".into(),
            run_id: Uuid::nil(),
            trigger: RunTrigger::Schedule,
            timestamp: Utc::now(),
        };
        assert_eq!(event_name(&started), "started");
        let note = JobEvent::Notification {
            job_id: "a".into(),
            kind: NotificationKind::JobFailed,
            message: "x".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(event_name(&note), "notification");
    }
}
