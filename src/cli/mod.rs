pub mod daemon;
pub mod jobs;

use clap::{Parser, Subcommand};
use reqwest::Response;
use serde_json::Value;

/// Vacancy Ingest - scheduled job-posting ingestion daemon
#[derive(Parser, Debug)]
#[command(
    name = "vingest",
    version,
    about = "Vacancy Ingest - scheduled job-posting ingestion daemon"
)]
pub struct Cli {
    /// Daemon host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Daemon port
    #[arg(long, default_value_t = 8390, global = true)]
    pub port: u16,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },

    /// Run one configured job immediately, without a daemon, and print its report
    RunOnce {
        /// Job id
        job: String,

        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show daemon health
    Status,

    /// List scheduled jobs
    Jobs {
        /// Show only enabled jobs
        #[arg(long, conflicts_with = "disabled")]
        enabled: bool,

        /// Show only disabled jobs
        #[arg(long, conflicts_with = "enabled")]
        disabled: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manually run a job on the daemon
    Trigger {
        /// Job id
        job: String,

        /// Wait for the run to finish and print its outcome
        #[arg(long)]
        wait: bool,
    },

    /// Change a job's schedule or enabled flag
    Set {
        /// Job id
        job: String,

        /// New cron schedule expression
        #[arg(short = 's', long)]
        schedule: Option<String>,

        /// Enable the job
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable the job
        #[arg(long, conflicts_with = "enable")]
        disable: bool,
    },

    /// Stop the daemon
    Stop,
}

/// Build the base URL for the daemon HTTP API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Format a connection error message for when the daemon is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to daemon at {}:{}. Is it running? (try: vingest serve)",
        host, port
    )
}

/// Helper to handle reqwest errors and produce a user-friendly connection error.
pub(crate) fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

/// Read a JSON body, turning a non-success status into the daemon's message.
/// Statuses in `accept` are returned as success even when not 2xx.
pub(crate) async fn read_json(response: Response, accept: &[u16]) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !status.is_success() && !accept.contains(&status.as_u16()) {
        let message = body["message"].as_str().unwrap_or("Unknown error");
        anyhow::bail!("{} ({})", message, status);
    }
    Ok(body)
}

/// Format an uptime in seconds as e.g. "2h 5m 10s".
pub fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

impl Cli {
    /// Commands that run the pipeline in-process and install their own
    /// subscriber, including the log file.
    pub fn runs_locally(&self) -> bool {
        matches!(
            self.command,
            Some(Commands::Serve { .. }) | Some(Commands::RunOnce { .. })
        )
    }
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Some(Commands::Serve { config, data_dir }) => {
            daemon::cmd_serve(
                &cli.host,
                cli.port,
                config.as_deref(),
                data_dir.as_deref(),
                cli.verbose,
            )
            .await
        }
        Some(Commands::RunOnce {
            job,
            config,
            data_dir,
            json,
        }) => {
            daemon::cmd_run_once(job, config.as_deref(), data_dir.as_deref(), *json, cli.verbose)
                .await
        }
        Some(Commands::Status) => daemon::cmd_status(&cli.host, cli.port, cli.verbose).await,
        Some(Commands::Stop) => daemon::cmd_stop(&cli.host, cli.port).await,
        Some(Commands::Jobs {
            enabled,
            disabled,
            json,
        }) => jobs::cmd_jobs(&cli.host, cli.port, *enabled, *disabled, *json).await,
        Some(Commands::Trigger { job, wait }) => {
            jobs::cmd_trigger(&cli.host, cli.port, job, *wait).await
        }
        Some(Commands::Set {
            job,
            schedule,
            enable,
            disable,
        }) => {
            let enabled = match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            jobs::cmd_set(&cli.host, cli.port, job, schedule.as_deref(), enabled).await
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
