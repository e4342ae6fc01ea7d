use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Stopped,
}

/// Most recent failure across all jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastJobError {
    pub job_id: String,
    pub at: DateTime<Utc>,
    pub message: Option<String>,
}

/// Aggregated view over every scheduled job. Computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHealthSnapshot {
    pub status: HealthStatus,
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub last_error: Option<LastJobError>,
    pub uptime_seconds: u64,
    pub checked_at: DateTime<Utc>,
}
