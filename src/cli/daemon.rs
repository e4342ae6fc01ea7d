// CLI daemon commands: serve, run-once, status, stop

use std::path::Path;

use reqwest::Client;

use super::{base_url, format_uptime, handle_request_error, read_json};
use crate::daemon::executor::RunOutcome;

/// vingest serve
pub async fn cmd_serve(
    host: &str,
    port: u16,
    config: Option<&str>,
    data_dir: Option<&str>,
    verbose: bool,
) -> anyhow::Result<()> {
    // Global flags override the config file only when set away from their defaults.
    let host_override = (host != "127.0.0.1").then_some(host);
    let port_override = (port != 8390).then_some(port);

    crate::daemon::start_daemon(
        config.map(Path::new),
        data_dir.map(Path::new),
        host_override,
        port_override,
        verbose,
    )
    .await
}

/// vingest run-once
pub async fn cmd_run_once(
    job: &str,
    config: Option<&str>,
    data_dir: Option<&str>,
    json: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let _guard = crate::daemon::init_tracing(None, verbose);
    let outcome =
        crate::daemon::run_once(config.map(Path::new), data_dir.map(Path::new), job).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if !outcome.success {
        anyhow::bail!(
            "Job '{}' failed: {}",
            outcome.job_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub(crate) fn print_outcome(outcome: &RunOutcome) {
    let duration = (outcome.finished_at - outcome.started_at).num_milliseconds();
    println!(
        "Run {} of '{}': {} in {}ms",
        outcome.run_id,
        outcome.job_id,
        if outcome.success { "succeeded" } else { "failed" },
        duration
    );
    if let Some(ref report) = outcome.report {
        println!("  Pages:       {}", report.pages_fetched);
        println!(
            "  Items:       {} seen / {} new / {} existing",
            report.items_seen, report.new_items, report.existing_items
        );
        println!(
            "  Stored:      {} created / {} duplicates / {} invalid",
            report.created, report.duplicates, report.invalid
        );
        if let Some(ref reason) = report.stop_reason {
            println!("  Stopped:     {}", reason);
        }
    }
    if let Some(ref error) = outcome.error {
        println!("  Error:       {}", error);
    }
}

/// vingest status
pub async fn cmd_status(host: &str, port: u16, verbose: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/health", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    // 503 still carries a snapshot.
    let body = read_json(response, &[503]).await?;

    let status = body["status"].as_str().unwrap_or("unknown");
    let version = body["version"].as_str().unwrap_or("unknown");
    let uptime = body["uptime_seconds"].as_u64().unwrap_or(0);
    let running = body["running_jobs"].as_u64().unwrap_or(0);
    let total = body["total_jobs"].as_u64().unwrap_or(0);

    println!("Daemon Status: {}", status);
    println!("  API:         http://{}:{}", host, port);
    println!("  Jobs:        {} running / {} total", running, total);
    println!("  Uptime:      {}", format_uptime(uptime));
    println!("  Version:     {}", version);
    if let Some(job_id) = body["last_error"]["job_id"].as_str() {
        println!(
            "  Last Error:  {} at {}: {}",
            job_id,
            body["last_error"]["at"].as_str().unwrap_or("?"),
            body["last_error"]["message"].as_str().unwrap_or("-")
        );
    }

    if verbose {
        println!("\nRaw response:");
        println!("{}", serde_json::to_string_pretty(&body)?);
    }

    Ok(())
}

/// vingest stop
pub async fn cmd_stop(host: &str, port: u16) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/shutdown", base_url(host, port));

    let response = client
        .post(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    read_json(response, &[]).await?;

    println!("Daemon is shutting down...");
    Ok(())
}
