use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{IngestError, ValidationErrors};

/// Window inside which a failure counts as "recent" for health purposes.
pub const RECENT_ERROR_WINDOW_SECS: i64 = 3600;

/// Registration input for a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledJob {
    pub id: String,
    pub name: String,
    pub schedule: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Live reconfiguration of a registered job. Counters are never touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobConfigUpdate {
    pub schedule: Option<String>,
    pub enabled: Option<bool>,
}

/// One recurring ingestion task and its run history.
///
/// Idle (enabled, not running) -> Running via [`ScheduledJob::start`], and back
/// to Idle via [`ScheduledJob::complete_success`] or
/// [`ScheduledJob::complete_with_error`]. Every other mutation goes through
/// [`ScheduledJob::update_config`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    id: String,
    name: String,
    schedule: String,
    timezone: Option<String>,
    enabled: bool,
    running: bool,
    last_run: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<DateTime<Utc>>,
    last_error_message: Option<String>,
    run_count: u64,
    success_count: u64,
    error_count: u64,
}

/// Read-only view of a job for diagnostics and the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub timezone: Option<String>,
    pub enabled: bool,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    /// Validate `new` and build an idle job with zeroed counters.
    pub fn new(new: NewScheduledJob) -> Result<Self, ValidationErrors> {
        validate_new_job(&new)?;
        Ok(Self {
            id: new.id,
            name: new.name,
            schedule: new.schedule,
            timezone: new.timezone,
            enabled: new.enabled,
            running: false,
            last_run: None,
            last_success: None,
            last_error: None,
            last_error_message: None,
            run_count: 0,
            success_count: 0,
            error_count: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn last_error(&self) -> Option<DateTime<Utc>> {
        self.last_error
    }

    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error_message.as_deref()
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// enabled and not running
    pub fn can_run(&self) -> bool {
        self.enabled && !self.running
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), IngestError> {
        if !self.enabled {
            return Err(IngestError::InvalidState(format!(
                "job '{}' is disabled",
                self.id
            )));
        }
        if self.running {
            return Err(IngestError::InvalidState(format!(
                "job '{}' is already running",
                self.id
            )));
        }
        self.running = true;
        self.last_run = Some(now);
        self.run_count += 1;
        Ok(())
    }

    pub fn complete_success(&mut self, now: DateTime<Utc>) -> Result<(), IngestError> {
        self.ensure_running()?;
        self.running = false;
        self.last_success = Some(now);
        self.success_count += 1;
        Ok(())
    }

    pub fn complete_with_error(
        &mut self,
        now: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Result<(), IngestError> {
        self.ensure_running()?;
        self.running = false;
        self.last_error = Some(now);
        self.last_error_message = Some(message.into());
        self.error_count += 1;
        Ok(())
    }

    /// Apply a reconfiguration. Allowed while running; the scheduler picks up
    /// the new schedule at its next trigger evaluation.
    pub fn update_config(&mut self, update: &JobConfigUpdate) -> Result<(), IngestError> {
        validate_job_config_update(update)?;
        if let Some(ref schedule) = update.schedule {
            self.schedule = schedule.clone();
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        Ok(())
    }

    /// Percentage of runs that succeeded, rounded to two decimals.
    pub fn success_rate(&self) -> f64 {
        if self.run_count == 0 {
            return 0.0;
        }
        let rate = self.success_count as f64 / self.run_count as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }

    pub fn has_recent_errors(&self, now: DateTime<Utc>) -> bool {
        match self.last_error {
            Some(at) => now - at <= Duration::seconds(RECENT_ERROR_WINDOW_SECS),
            None => false,
        }
    }

    /// True when the latest completion was a failure.
    pub fn last_run_failed(&self) -> bool {
        match (self.last_error, self.last_success) {
            (Some(err), Some(ok)) => err > ok,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn summary(&self, next_run_at: Option<DateTime<Utc>>) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            schedule: self.schedule.clone(),
            timezone: self.timezone.clone(),
            enabled: self.enabled,
            running: self.running,
            last_run: self.last_run,
            last_success: self.last_success,
            last_error: self.last_error,
            last_error_message: self.last_error_message.clone(),
            run_count: self.run_count,
            success_count: self.success_count,
            error_count: self.error_count,
            success_rate: self.success_rate(),
            next_run_at,
        }
    }

    fn ensure_running(&self) -> Result<(), IngestError> {
        if self.running {
            Ok(())
        } else {
            Err(IngestError::InvalidState(format!(
                "job '{}' is not running",
                self.id
            )))
        }
    }
}

/// Validate a NewScheduledJob before registration, collecting every problem.
pub fn validate_new_job(job: &NewScheduledJob) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if job.id.trim().is_empty() {
        errors.push("Job id cannot be empty");
    } else if !is_slug(&job.id) {
        errors.push(format!(
            "Job id '{}' must contain only lowercase letters, digits, '-' or '_'",
            job.id
        ));
    }

    if job.name.trim().is_empty() {
        errors.push("Job name cannot be empty");
    }

    if job.schedule.trim().is_empty() {
        errors.push("Job schedule cannot be empty");
    } else if let Err(e) = validate_cron(&job.schedule) {
        errors.push(e);
    }

    if let Some(ref tz) = job.timezone {
        if let Err(e) = validate_timezone(tz) {
            errors.push(e);
        }
    }

    errors.into_result()
}

/// Validate a JobConfigUpdate before applying.
pub fn validate_job_config_update(update: &JobConfigUpdate) -> Result<(), IngestError> {
    if let Some(ref schedule) = update.schedule {
        validate_cron(schedule).map_err(IngestError::Cron)?;
    }
    Ok(())
}

pub(crate) fn validate_cron(expr: &str) -> Result<(), String> {
    use croner::Cron;
    use std::str::FromStr;
    Cron::from_str(expr)
        .map_err(|e| format!("Invalid cron expression '{}': {}", expr, e))?;
    Ok(())
}

fn validate_timezone(tz: &str) -> Result<(), String> {
    tz.parse::<chrono_tz::Tz>()
        .map_err(|e| format!("Invalid timezone '{}': {}", tz, e))?;
    Ok(())
}

fn is_slug(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_new_job() -> NewScheduledJob {
        NewScheduledJob {
            id: "hh-sync".to_string(),
            name: "HH vacancies".to_string(),
            schedule: "*/30 * * * *".to_string(),
            enabled: true,
            timezone: None,
        }
    }

    fn make_job() -> ScheduledJob {
        ScheduledJob::new(make_new_job()).expect("valid job")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_new_job_starts_idle_with_zero_counters() {
        let job = make_job();
        assert!(job.can_run());
        assert!(!job.is_running());
        assert_eq!(job.run_count(), 0);
        assert_eq!(job.success_count(), 0);
        assert_eq!(job.error_count(), 0);
        assert!(job.last_run().is_none());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let new = NewScheduledJob {
            id: "".to_string(),
            name: "  ".to_string(),
            schedule: "".to_string(),
            enabled: true,
            timezone: None,
        };
        let errors = ScheduledJob::new(new).unwrap_err();
        assert_eq!(errors.messages().len(), 3);
        assert!(errors.to_string().contains("id"));
        assert!(errors.to_string().contains("name"));
        assert!(errors.to_string().contains("schedule"));
    }

    #[test]
    fn test_validation_rejects_non_slug_id() {
        let mut new = make_new_job();
        new.id = "HH Sync".to_string();
        let errors = ScheduledJob::new(new).unwrap_err();
        assert!(errors.to_string().contains("lowercase"));
    }

    #[test]
    fn test_validation_rejects_invalid_cron() {
        let mut new = make_new_job();
        new.schedule = "not a cron".to_string();
        let errors = ScheduledJob::new(new).unwrap_err();
        assert!(errors.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_validation_rejects_invalid_timezone() {
        let mut new = make_new_job();
        new.timezone = Some("Not/A/Timezone".to_string());
        let errors = ScheduledJob::new(new).unwrap_err();
        assert!(errors.to_string().contains("timezone"));
    }

    #[test]
    fn test_start_increments_run_count_and_sets_running() {
        let mut job = make_job();
        job.start(t0()).expect("start");
        assert!(job.is_running());
        assert!(!job.can_run());
        assert_eq!(job.run_count(), 1);
        assert_eq!(job.last_run(), Some(t0()));
    }

    #[test]
    fn test_start_on_running_job_fails() {
        let mut job = make_job();
        job.start(t0()).unwrap();
        match job.start(t0()) {
            Err(IngestError::InvalidState(msg)) => assert!(msg.contains("already running")),
            other => panic!("Expected InvalidState, got: {:?}", other),
        }
        assert_eq!(job.run_count(), 1);
    }

    #[test]
    fn test_start_on_disabled_job_fails() {
        let mut new = make_new_job();
        new.enabled = false;
        let mut job = ScheduledJob::new(new).unwrap();
        match job.start(t0()) {
            Err(IngestError::InvalidState(msg)) => assert!(msg.contains("disabled")),
            other => panic!("Expected InvalidState, got: {:?}", other),
        }
        assert_eq!(job.run_count(), 0);
    }

    #[test]
    fn test_complete_without_start_fails() {
        let mut job = make_job();
        assert!(matches!(
            job.complete_success(t0()),
            Err(IngestError::InvalidState(_))
        ));
        assert!(matches!(
            job.complete_with_error(t0(), "boom"),
            Err(IngestError::InvalidState(_))
        ));
        assert_eq!(job.success_count(), 0);
        assert_eq!(job.error_count(), 0);
    }

    #[test]
    fn test_complete_success_updates_only_success_side() {
        let mut job = make_job();
        job.start(t0()).unwrap();
        let done = t0() + Duration::seconds(5);
        job.complete_success(done).unwrap();
        assert!(!job.is_running());
        assert_eq!(job.success_count(), 1);
        assert_eq!(job.error_count(), 0);
        assert_eq!(job.last_success(), Some(done));
        assert!(job.last_error().is_none());
    }

    #[test]
    fn test_complete_with_error_updates_only_error_side() {
        let mut job = make_job();
        job.start(t0()).unwrap();
        job.complete_with_error(t0(), "HTTP 503").unwrap();
        assert!(!job.is_running());
        assert_eq!(job.success_count(), 0);
        assert_eq!(job.error_count(), 1);
        assert_eq!(job.last_error(), Some(t0()));
        assert_eq!(job.last_error_message(), Some("HTTP 503"));
        assert!(job.last_success().is_none());
    }

    #[test]
    fn test_counter_invariant_holds_across_mixed_operations() {
        let mut job = make_job();
        let mut now = t0();
        for i in 0..25u32 {
            now += Duration::minutes(1);
            let _ = job.start(now);
            if i % 3 == 0 {
                // Leave running across an iteration: the next start must fail
                continue;
            }
            if i % 2 == 0 {
                let _ = job.complete_success(now);
            } else {
                let _ = job.complete_with_error(now, "boom");
            }
            // Extra completions on an idle job are rejected
            let _ = job.complete_success(now);
            assert!(job.success_count() + job.error_count() <= job.run_count());
        }
        assert!(job.success_count() + job.error_count() <= job.run_count());
    }

    #[test]
    fn test_success_rate_zero_without_runs() {
        let job = make_job();
        assert_eq!(job.success_rate(), 0.0);
    }

    #[test]
    fn test_success_rate_exact_percentage() {
        let mut job = make_job();
        for ok in [true, true, false, true] {
            job.start(t0()).unwrap();
            if ok {
                job.complete_success(t0()).unwrap();
            } else {
                job.complete_with_error(t0(), "x").unwrap();
            }
        }
        assert_eq!(job.success_rate(), 75.0);
    }

    #[test]
    fn test_success_rate_rounded_to_two_decimals() {
        let mut job = make_job();
        for ok in [true, true, false] {
            job.start(t0()).unwrap();
            if ok {
                job.complete_success(t0()).unwrap();
            } else {
                job.complete_with_error(t0(), "x").unwrap();
            }
        }
        assert_eq!(job.success_rate(), 66.67);
    }

    #[test]
    fn test_success_rate_counts_in_flight_run() {
        let mut job = make_job();
        job.start(t0()).unwrap();
        job.complete_success(t0()).unwrap();
        job.start(t0()).unwrap();
        assert_eq!(job.success_rate(), 50.0);
    }

    #[test]
    fn test_has_recent_errors_window() {
        let mut job = make_job();
        assert!(!job.has_recent_errors(t0()));
        job.start(t0()).unwrap();
        job.complete_with_error(t0(), "boom").unwrap();
        assert!(job.has_recent_errors(t0() + Duration::minutes(59)));
        assert!(!job.has_recent_errors(t0() + Duration::minutes(61)));
    }

    #[test]
    fn test_last_run_failed_tracks_latest_completion() {
        let mut job = make_job();
        assert!(!job.last_run_failed());
        job.start(t0()).unwrap();
        job.complete_with_error(t0(), "boom").unwrap();
        assert!(job.last_run_failed());
        let later = t0() + Duration::minutes(5);
        job.start(later).unwrap();
        job.complete_success(later).unwrap();
        assert!(!job.last_run_failed());
    }

    #[test]
    fn test_update_config_keeps_counters() {
        let mut job = make_job();
        job.start(t0()).unwrap();
        job.complete_success(t0()).unwrap();
        job.update_config(&JobConfigUpdate {
            schedule: Some("0 * * * *".to_string()),
            enabled: Some(false),
        })
        .unwrap();
        assert_eq!(job.schedule(), "0 * * * *");
        assert!(!job.enabled());
        assert_eq!(job.run_count(), 1);
        assert_eq!(job.success_count(), 1);
    }

    #[test]
    fn test_update_config_while_running_is_allowed() {
        let mut job = make_job();
        job.start(t0()).unwrap();
        job.update_config(&JobConfigUpdate {
            schedule: Some("0 6 * * *".to_string()),
            enabled: None,
        })
        .unwrap();
        assert!(job.is_running());
        assert_eq!(job.schedule(), "0 6 * * *");
        job.complete_success(t0()).unwrap();
    }

    #[test]
    fn test_update_config_rejects_invalid_cron() {
        let mut job = make_job();
        let result = job.update_config(&JobConfigUpdate {
            schedule: Some("bad cron".to_string()),
            enabled: Some(false),
        });
        assert!(matches!(result, Err(IngestError::Cron(_))));
        assert_eq!(job.schedule(), "*/30 * * * *");
        assert!(job.enabled());
    }

    #[test]
    fn test_summary_reflects_state() {
        let mut job = make_job();
        job.start(t0()).unwrap();
        let summary = job.summary(None);
        assert_eq!(summary.id, "hh-sync");
        assert!(summary.running);
        assert_eq!(summary.run_count, 1);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[test]
    fn test_new_job_default_enabled() {
        let json = r#"{"id":"x","name":"x","schedule":"* * * * *"}"#;
        let new: NewScheduledJob = serde_json::from_str(json).expect("deserialize");
        assert!(new.enabled);
        assert!(new.timezone.is_none());
    }

    #[test]
    fn test_job_config_update_serde_partial() {
        let json = r#"{"enabled":false}"#;
        let update: JobConfigUpdate = serde_json::from_str(json).expect("deserialize");
        assert_eq!(update.enabled, Some(false));
        assert!(update.schedule.is_none());
    }
}
