use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::errors::IngestError;

/// Counters a job body reports for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub pages_fetched: usize,
    pub items_seen: usize,
    pub new_items: usize,
    pub existing_items: usize,
    pub created: usize,
    pub duplicates: usize,
    /// Items dropped because they could not be normalized or had vanished.
    pub invalid: usize,
    pub stop_reason: Option<String>,
}

impl RunReport {
    pub fn merge(&mut self, other: RunReport) {
        self.pages_fetched += other.pages_fetched;
        self.items_seen += other.items_seen;
        self.new_items += other.new_items;
        self.existing_items += other.existing_items;
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.invalid += other.invalid;
        if other.stop_reason.is_some() {
            self.stop_reason = other.stop_reason;
        }
    }
}

/// The work a scheduled job performs. Retries, if any, are the body's concern.
#[async_trait]
pub trait JobBody: Send + Sync {
    async fn run(&self) -> anyhow::Result<RunReport>;
}

/// Terminal result of one run, as seen by whoever triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub job_id: String,
    pub run_id: Uuid,
    pub success: bool,
    pub report: Option<RunReport>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Returned by a manual trigger; resolves once the run reaches a terminal state.
#[derive(Debug)]
pub struct RunHandle {
    pub job_id: String,
    pub run_id: Uuid,
    pub(crate) completion: oneshot::Receiver<RunOutcome>,
}

impl RunHandle {
    pub async fn wait(self) -> Result<RunOutcome, IngestError> {
        self.completion.await.map_err(|_| {
            IngestError::Internal(format!("run {} of '{}' was dropped", self.run_id, self.job_id))
        })
    }
}

/// Run `body` in its own task so that a panic surfaces as an error instead of
/// unwinding through the scheduler.
pub(crate) async fn run_isolated(body: Arc<dyn JobBody>) -> Result<RunReport, String> {
    let task = tokio::spawn(async move { body.run().await });
    match task.await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("job body panicked: {}", message))
        }
        Err(join_err) => Err(format!("job body was cancelled: {}", join_err)),
    }
}
