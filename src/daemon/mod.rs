// Daemon bootstrap: configuration, tracing, pipeline wiring and the serve loop.

pub mod events;
pub mod executor;
pub mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::daemon::events::JobEvent;
use crate::daemon::executor::{JobBody, RunOutcome};
use crate::daemon::scheduler::{Clock, Scheduler, SystemClock};
use crate::ingest::{DedupGate, SourceIngestJob};
use crate::models::{AppConfig, ScheduledJob, StoreKind};
use crate::server::{self, AppState};
use crate::sources::build_adapters;
use crate::storage::json::JsonVacancyStore;
use crate::storage::memory::MemoryVacancyStore;
use crate::storage::VacancyStore;

const APP_DIR_NAME: &str = "vacancy-ingest";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn read_config_file(path: &Path, origin: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", origin))?;
    let config: AppConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", origin))?;
    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}

/// Load the AppConfig using the resolution order:
///   1. --config CLI flag (passed as config_path)
///   2. VINGEST_CONFIG_DIR environment variable
///   3. Platform config dir (dirs::config_dir()/vacancy-ingest/config.json)
///   4. {data_dir}/config.json
///   5. AppConfig::default()
///
/// The loaded configuration is validated before it is returned.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig> {
    let config = resolve_config(config_path)?;
    config
        .validate()
        .map_err(|errors| anyhow::anyhow!("Invalid configuration: {}", errors))?;
    Ok(config)
}

fn resolve_config(config_path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = config_path {
        if path.exists() {
            return read_config_file(path, "--config");
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    if let Ok(config_dir) = std::env::var("VINGEST_CONFIG_DIR") {
        let path = PathBuf::from(&config_dir).join("config.json");
        if path.exists() {
            return read_config_file(&path, "VINGEST_CONFIG_DIR");
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join(APP_DIR_NAME).join("config.json");
        if path.exists() {
            return read_config_file(&path, "platform config dir");
        }
    }

    let path = resolve_data_dir(None).join("config.json");
    if path.exists() {
        return read_config_file(&path, "data dir");
    }

    tracing::info!("No config file found, using defaults");
    Ok(AppConfig::default())
}

/// Resolve the data directory: explicit override, then `VINGEST_DATA_DIR`,
/// then `dirs::data_dir()/vacancy-ingest`.
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(d) = std::env::var("VINGEST_DATA_DIR") {
        return PathBuf::from(d);
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// The data directory a daemon built from `config` uses.
pub fn effective_data_dir(config: &AppConfig, override_dir: Option<&Path>) -> PathBuf {
    match (override_dir, &config.data_dir) {
        (Some(d), _) => d.to_path_buf(),
        (None, Some(d)) => d.clone(),
        (None, None) => resolve_data_dir(None),
    }
}

pub async fn create_data_dir(data_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;
    tracing::info!("Data directory ensured at: {}", data_dir.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// `debug` when verbose, otherwise `RUST_LOG` falling back to `info`.
fn tracing_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber: stderr output, and with a log directory
/// also a plain-text `ingest.log`.
///
/// The returned guard must be held for the life of the process, or buffered
/// file output is lost.
pub fn init_tracing(log_dir: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
    let filter = tracing_filter(verbose);
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "ingest.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init();
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub async fn build_store(config: &AppConfig, data_dir: &Path) -> Result<Arc<dyn VacancyStore>> {
    let store: Arc<dyn VacancyStore> = match config.store {
        StoreKind::Json => Arc::new(JsonVacancyStore::new(data_dir.to_path_buf()).await?),
        StoreKind::Memory => Arc::new(MemoryVacancyStore::new()),
    };
    Ok(store)
}

/// Build one ingestion body per configured job, each crawling the adapters
/// of the source it references.
pub fn build_job_bodies(
    config: &AppConfig,
    store: Arc<dyn VacancyStore>,
    clock: Arc<dyn Clock>,
) -> Result<Vec<(ScheduledJob, Arc<dyn JobBody>)>> {
    let mut bodies = Vec::with_capacity(config.jobs.len());
    for job in &config.jobs {
        let source = config
            .source(&job.source)
            .with_context(|| format!("Job '{}' references unknown source '{}'", job.id, job.source))?;
        let adapters = build_adapters(source)
            .with_context(|| format!("Failed to build adapters for source '{}'", job.source))?;
        let scheduled = ScheduledJob::new(job.to_new_job())
            .map_err(|errors| anyhow::anyhow!("Job '{}': {}", job.id, errors))?;
        let body: Arc<dyn JobBody> = Arc::new(SourceIngestJob::from_config(
            job,
            adapters,
            DedupGate::new(Arc::clone(&store)),
            Arc::clone(&clock),
        ));
        bodies.push((scheduled, body));
    }
    Ok(bodies)
}

/// Build a scheduler with every configured job registered. Not started.
pub fn build_scheduler(
    config: &AppConfig,
    store: Arc<dyn VacancyStore>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<JobEvent>,
) -> Result<Scheduler> {
    let mut scheduler = Scheduler::new(
        Arc::clone(&clock),
        event_tx,
        Duration::from_secs(config.health_check_interval_secs),
    );
    for (job, body) in build_job_bodies(config, store, clock)? {
        scheduler.register(job, body)?;
    }
    Ok(scheduler)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run a single configured job once, outside any daemon, and return its outcome.
pub async fn run_once(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
    job_id: &str,
) -> Result<RunOutcome> {
    let config = load_config(config_path)?;
    if config.job(job_id).is_none() {
        return Err(anyhow::anyhow!("Job '{}' is not configured", job_id));
    }
    let data_dir = effective_data_dir(&config, data_dir_override);
    create_data_dir(&data_dir).await?;

    let store = build_store(&config, &data_dir).await?;
    let (event_tx, _) = broadcast::channel::<JobEvent>(config.broadcast_capacity);
    let scheduler = Arc::new(build_scheduler(
        &config,
        store,
        Arc::new(SystemClock),
        event_tx,
    )?);

    let outcome = scheduler.run_job_manually(job_id)?.wait().await?;
    scheduler.stop().await;
    Ok(outcome)
}

/// Start the daemon in the foreground.
///
/// Loads config, opens the store, registers every job, starts the scheduler
/// and the admin HTTP server, then waits for Ctrl+C, SIGTERM or an API
/// shutdown request. On shutdown no new runs start and in-flight runs are
/// awaited before returning.
pub async fn start_daemon(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
    host_override: Option<&str>,
    port_override: Option<u16>,
    verbose: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(h) = host_override {
        config.host = h.to_string();
    }
    if let Some(p) = port_override {
        config.port = p;
    }

    let data_dir = effective_data_dir(&config, data_dir_override);
    config.data_dir = Some(data_dir.clone());
    create_data_dir(&data_dir).await?;
    let _log_guard = init_tracing(Some(&data_dir), verbose);

    let store = build_store(&config, &data_dir).await?;
    let (event_tx, _event_rx) = broadcast::channel::<JobEvent>(config.broadcast_capacity);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = Arc::new(build_scheduler(&config, store, clock, event_tx.clone())?);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(());

    let state = Arc::new(AppState {
        scheduler: Arc::clone(&scheduler),
        event_tx: event_tx.clone(),
        shutdown_tx: Some(shutdown_tx.clone()),
    });

    scheduler.start();

    let router = server::create_router(Arc::clone(&state));
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context(format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Daemon started. Listening on http://{}", bind_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
                tracing::info!("HTTP server received shutdown signal");
            })
            .await
            .ok();
    });

    let mut api_shutdown_rx = shutdown_tx.subscribe();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
            _ = api_shutdown_rx.changed() => {
                tracing::info!("Received API shutdown signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = api_shutdown_rx.changed() => {
                tracing::info!("Received API shutdown signal");
            }
        }
    }

    let _ = shutdown_tx.send(());
    scheduler.stop().await;
    let _ = server_handle.await;

    tracing::info!("Daemon exited cleanly.");
    Ok(())
}
