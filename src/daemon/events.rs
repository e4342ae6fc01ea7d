use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::daemon::executor::RunReport;
use crate::models::JobHealthSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Schedule,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A run ended with an error.
    JobFailed,
    /// First successful run after a failed one.
    JobRecovered,
}

/// Lifecycle events fanned out over the scheduler's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum JobEvent {
    Started {
        job_id: String,
        run_id: Uuid,
        trigger: RunTrigger,
        timestamp: DateTime<Utc>,
    },
    Completed {
        job_id: String,
        run_id: Uuid,
        success: bool,
        error: Option<String>,
        report: Option<RunReport>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    HealthCheck(JobHealthSnapshot),
    Notification {
        job_id: String,
        kind: NotificationKind,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Notification { job_id, .. } => Some(job_id),
            JobEvent::HealthCheck(_) => None,
        }
    }
}
