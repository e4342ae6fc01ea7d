use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::daemon::events::{JobEvent, NotificationKind, RunTrigger};
use crate::daemon::executor::{run_isolated, JobBody, RunHandle, RunOutcome, RunReport};
use crate::errors::{IngestError, ValidationErrors};
use crate::models::{
    HealthStatus, JobConfigUpdate, JobHealthSnapshot, JobSummary, LastJobError, ScheduledJob,
};

// ---------------------------------------------------------------------------
// Clock trait + implementations
// ---------------------------------------------------------------------------

/// Source of wall-clock time for job bookkeeping and trigger computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real clock backed by system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct FakeClock {
    time: std::sync::RwLock<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: std::sync::RwLock::new(time),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        *self.time.write().unwrap_or_else(PoisonError::into_inner) += duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// compute_next_run: timezone-aware cron next-occurrence calculation
// ---------------------------------------------------------------------------

/// Next fire time for `schedule` strictly after `after`.
///
/// With a timezone the expression is evaluated in that IANA zone and the
/// result converted back to UTC; otherwise it is evaluated in UTC.
pub fn compute_next_run(
    schedule: &str,
    timezone: Option<&str>,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, IngestError> {
    use std::str::FromStr;
    let cron = croner::Cron::from_str(schedule)
        .map_err(|e| IngestError::Cron(format!("Invalid cron expression '{}': {}", schedule, e)))?;

    match timezone {
        Some(tz_str) => {
            let tz: chrono_tz::Tz = tz_str
                .parse()
                .map_err(|e| IngestError::Cron(format!("Invalid timezone '{}': {}", tz_str, e)))?;
            let local_after = after.with_timezone(&tz);
            let next_local = cron
                .find_next_occurrence(&local_after, false)
                .map_err(|e| IngestError::Cron(format!("Cron next occurrence error: {}", e)))?;
            Ok(next_local.with_timezone(&Utc))
        }
        None => cron
            .find_next_occurrence(&after, false)
            .map_err(|e| IngestError::Cron(format!("Cron next occurrence error: {}", e))),
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every [`ScheduledJob`], fires them from their cron triggers and
/// guarantees at most one in-flight run per job id.
///
/// The job's own `running` flag is the run guard: it is checked and set under
/// the jobs lock, so overlapping triggers are skipped rather than queued.
pub struct Scheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    bodies: HashMap<String, Arc<dyn JobBody>>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<JobEvent>,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
    health_interval: Duration,
    started: AtomicBool,
    draining: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    active: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        event_tx: broadcast::Sender<JobEvent>,
        health_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Mutex::new(HashMap::new()),
            bodies: HashMap::new(),
            clock,
            event_tx,
            notify: Notify::new(),
            shutdown_tx,
            health_interval,
            started: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            started_at: Mutex::new(None),
            active: Mutex::new(HashMap::new()),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Register a job and the body it runs. Only possible before the
    /// scheduler is shared.
    pub fn register(
        &mut self,
        job: ScheduledJob,
        body: Arc<dyn JobBody>,
    ) -> Result<(), IngestError> {
        let id = job.id().to_string();
        let jobs = self
            .jobs
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&id) {
            let mut errors = ValidationErrors::new();
            errors.push(format!("duplicate job id '{}'", id));
            return Err(errors.into());
        }
        jobs.insert(id.clone(), job);
        self.bodies.insert(id, body);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Activate the cron triggers and the periodic health check. Calling it
    /// again is a no-op, as is calling it after a stop.
    pub fn start(self: &Arc<Self>) {
        if self.is_draining() {
            tracing::warn!("Scheduler is stopping; start ignored");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *lock(&self.started_at) = Some(self.clock.now());

        let trigger = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.trigger_loop().await })
        };
        let health = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.health_loop().await })
        };
        lock(&self.background).extend([trigger, health]);

        tracing::info!("Scheduler started with {} jobs", lock(&self.jobs).len());
    }

    /// Stop firing triggers. Runs already in flight are left alone.
    pub fn begin_stop(&self) {
        {
            // Taken under the jobs lock so no launch can slip past the check.
            let _jobs = lock(&self.jobs);
            if self.draining.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        let _ = self.shutdown_tx.send(true);
        self.notify.notify_one();
        tracing::info!("Scheduler draining");
    }

    /// Stop firing triggers and wait for in-flight runs to finish.
    pub async fn stop(&self) {
        self.begin_stop();

        loop {
            let handles: Vec<JoinHandle<()>> =
                lock(&self.active).drain().map(|(_, h)| h).collect();
            if handles.is_empty() {
                break;
            }
            tracing::info!("Waiting for {} running jobs", handles.len());
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!("Run task ended abnormally: {}", e);
                }
            }
        }

        let background: Vec<JoinHandle<()>> = lock(&self.background).drain(..).collect();
        for handle in background {
            let _ = handle.await;
        }
        tracing::info!("Scheduler stopped");
    }

    /// Run a job now, bypassing its trigger but not the run guard.
    pub fn run_job_manually(self: &Arc<Self>, job_id: &str) -> Result<RunHandle, IngestError> {
        self.launch(job_id, RunTrigger::Manual)
    }

    /// Fire a job as its cron trigger would. Returns `None` when the firing
    /// was skipped because the job is busy, disabled, or the scheduler stopped.
    pub fn fire(self: &Arc<Self>, job_id: &str) -> Option<RunHandle> {
        match self.launch(job_id, RunTrigger::Schedule) {
            Ok(handle) => Some(handle),
            Err(IngestError::JobBusy(_)) => {
                tracing::debug!("Job '{}' still running; trigger skipped", job_id);
                None
            }
            Err(e) => {
                tracing::debug!("Trigger for '{}' skipped: {}", job_id, e);
                None
            }
        }
    }

    /// Change a job's schedule or enabled flag without touching its counters.
    pub fn update_job_config(
        &self,
        job_id: &str,
        update: &JobConfigUpdate,
    ) -> Result<JobSummary, IngestError> {
        let summary = {
            let mut jobs = lock(&self.jobs);
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| IngestError::JobNotFound(job_id.to_string()))?;
            job.update_config(update)?;
            job.summary(self.next_run_for(job))
        };
        tracing::info!(
            "Job '{}' reconfigured: schedule={}, enabled={}",
            job_id,
            summary.schedule,
            summary.enabled
        );
        self.notify.notify_one();
        Ok(summary)
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobSummary, IngestError> {
        let jobs = lock(&self.jobs);
        let job = jobs
            .get(job_id)
            .ok_or_else(|| IngestError::JobNotFound(job_id.to_string()))?;
        Ok(job.summary(self.next_run_for(job)))
    }

    /// Read-only summaries of every job, ordered by id.
    pub fn jobs_status(&self) -> Vec<JobSummary> {
        let jobs = lock(&self.jobs);
        let mut summaries: Vec<JobSummary> = jobs
            .values()
            .map(|job| job.summary(self.next_run_for(job)))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn health(&self) -> JobHealthSnapshot {
        let now = self.clock.now();
        let jobs = lock(&self.jobs);

        let status = if !self.is_started() || self.is_draining() {
            HealthStatus::Stopped
        } else if jobs
            .values()
            .any(|job| job.has_recent_errors(now) && job.last_run_failed())
        {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };

        let last_error = jobs
            .values()
            .filter_map(|job| {
                job.last_error().map(|at| LastJobError {
                    job_id: job.id().to_string(),
                    at,
                    message: job.last_error_message().map(str::to_string),
                })
            })
            .max_by_key(|e| e.at);

        let uptime_seconds = lock(&self.started_at)
            .map(|started| (now - started).num_seconds().max(0) as u64)
            .unwrap_or(0);

        JobHealthSnapshot {
            status,
            total_jobs: jobs.len(),
            running_jobs: jobs.values().filter(|job| job.is_running()).count(),
            last_error,
            uptime_seconds,
            checked_at: now,
        }
    }

    fn next_run_for(&self, job: &ScheduledJob) -> Option<DateTime<Utc>> {
        if !job.enabled() {
            return None;
        }
        compute_next_run(job.schedule(), job.timezone(), self.clock.now()).ok()
    }

    fn launch(self: &Arc<Self>, job_id: &str, trigger: RunTrigger) -> Result<RunHandle, IngestError> {
        let body = self
            .bodies
            .get(job_id)
            .cloned()
            .ok_or_else(|| IngestError::JobNotFound(job_id.to_string()))?;

        let run_id = Uuid::now_v7();
        let started_at = self.clock.now();
        let (completion_tx, completion_rx) = oneshot::channel();

        let mut jobs = lock(&self.jobs);
        if self.is_draining() {
            return Err(IngestError::SchedulerStopped);
        }
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| IngestError::JobNotFound(job_id.to_string()))?;
        if job.is_running() {
            return Err(IngestError::JobBusy(job_id.to_string()));
        }
        job.start(started_at)?;

        let _ = self.event_tx.send(JobEvent::Started {
            job_id: job_id.to_string(),
            run_id,
            trigger,
            timestamp: started_at,
        });
        tracing::info!("[job {}] Run {} started ({:?})", job_id, run_id, trigger);

        let scheduler = Arc::clone(self);
        let id = job_id.to_string();
        let task = tokio::spawn(async move {
            let result = run_isolated(body).await;
            let outcome = scheduler.finish(&id, run_id, started_at, result);
            lock(&scheduler.active).remove(&run_id);
            let _ = completion_tx.send(outcome);
        });

        {
            let mut active = lock(&self.active);
            active.retain(|_, handle| !handle.is_finished());
            if !task.is_finished() {
                active.insert(run_id, task);
            }
        }
        drop(jobs);

        Ok(RunHandle {
            job_id: job_id.to_string(),
            run_id,
            completion: completion_rx,
        })
    }

    /// Record the terminal state of a run and publish its events.
    fn finish(
        &self,
        job_id: &str,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        result: Result<RunReport, String>,
    ) -> RunOutcome {
        let finished_at = self.clock.now();

        let was_failing = {
            let mut jobs = lock(&self.jobs);
            match jobs.get_mut(job_id) {
                Some(job) => {
                    let was_failing = job.last_run_failed();
                    let recorded = match &result {
                        Ok(_) => job.complete_success(finished_at),
                        Err(message) => job.complete_with_error(finished_at, message.clone()),
                    };
                    if let Err(e) = recorded {
                        tracing::error!("[job {}] Failed to record completion: {}", job_id, e);
                    }
                    was_failing
                }
                None => false,
            }
        };

        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let (success, report, error) = match result {
            Ok(report) => {
                tracing::info!("[job {}] Run {} succeeded in {}ms", job_id, run_id, duration_ms);
                (true, Some(report), None)
            }
            Err(message) => {
                tracing::error!("[job {}] Run {} failed: {}", job_id, run_id, message);
                (false, None, Some(message))
            }
        };

        let _ = self.event_tx.send(JobEvent::Completed {
            job_id: job_id.to_string(),
            run_id,
            success,
            error: error.clone(),
            report: report.clone(),
            duration_ms,
            timestamp: finished_at,
        });

        let notification = match (&error, was_failing) {
            (Some(message), _) => Some((NotificationKind::JobFailed, message.clone())),
            (None, true) => Some((
                NotificationKind::JobRecovered,
                "job succeeded after a failed run".to_string(),
            )),
            (None, false) => None,
        };
        if let Some((kind, message)) = notification {
            let _ = self.event_tx.send(JobEvent::Notification {
                job_id: job_id.to_string(),
                kind,
                message,
                timestamp: finished_at,
            });
        }

        RunOutcome {
            job_id: job_id.to_string(),
            run_id,
            success,
            report,
            error,
            started_at,
            finished_at,
        }
    }

    /// Sleep until the earliest next trigger across enabled jobs, fire every
    /// job due at that instant, repeat. Wakes early on reconfiguration.
    async fn trigger_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        // Last slot fired per job, so a lagging clock cannot fire a slot twice.
        let mut last_fired: HashMap<String, DateTime<Utc>> = HashMap::new();

        loop {
            if *shutdown_rx.borrow() || self.is_draining() {
                break;
            }

            let now = self.clock.now();
            let next_runs: Vec<(String, DateTime<Utc>)> = {
                let jobs = lock(&self.jobs);
                jobs.values()
                    .filter(|job| job.enabled())
                    .filter_map(|job| {
                        let after = last_fired
                            .get(job.id())
                            .map_or(now, |fired| (*fired).max(now));
                        match compute_next_run(job.schedule(), job.timezone(), after) {
                            Ok(next) => Some((job.id().to_string(), next)),
                            Err(e) => {
                                tracing::error!("Invalid schedule for job '{}': {}", job.id(), e);
                                None
                            }
                        }
                    })
                    .collect()
            };

            let Some(earliest) = next_runs.iter().map(|(_, at)| *at).min() else {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = shutdown_rx.changed() => break,
                }
                continue;
            };

            let sleep_duration = (earliest - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    // The timer elapsed, so the earliest slot is due even if the clock lags.
                    let due_at = self.clock.now().max(earliest);
                    for (job_id, at) in &next_runs {
                        if *at <= due_at {
                            last_fired.insert(job_id.clone(), *at);
                            self.fire(job_id);
                        }
                    }
                }
                _ = self.notify.notified() => continue,
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::debug!("Trigger loop exited");
    }

    async fn health_loop(self: Arc<Self>) {
        if self.health_interval.is_zero() {
            return;
        }
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.health_interval) => {
                    let snapshot = self.health();
                    if snapshot.status == HealthStatus::Unhealthy {
                        tracing::warn!("Health check: {:?}", snapshot.last_error);
                    }
                    let _ = self.event_tx.send(JobEvent::HealthCheck(snapshot));
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
