// CLI job commands: jobs, trigger, set

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

use super::{base_url, handle_request_error, read_json};
use crate::daemon::executor::RunOutcome;
use crate::models::timestamp::{format_timestamp, parse_timestamp};
use crate::models::JobConfigUpdate;

/// Format a relative time string like "2 minutes ago" or "in 3 minutes".
/// A week or more away falls back to the absolute timestamp.
fn format_relative_time(dt: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(*dt).num_seconds();
    let abs = secs.abs();
    if abs >= 7 * 86400 {
        return format_timestamp(dt);
    }
    let amount = if abs < 60 {
        format!("{} seconds", abs)
    } else if abs < 3600 {
        format!("{} minutes", abs / 60)
    } else if abs < 86400 {
        format!("{} hours", abs / 3600)
    } else {
        format!("{} days", abs / 86400)
    };
    if secs < 0 {
        format!("in {}", amount)
    } else {
        format!("{} ago", amount)
    }
}

fn relative_field(value: &Value, now: DateTime<Utc>) -> String {
    value
        .as_str()
        .and_then(parse_timestamp)
        .map(|dt| format_relative_time(&dt, now))
        .unwrap_or_else(|| "-".to_string())
}

/// vingest jobs
pub async fn cmd_jobs(
    host: &str,
    port: u16,
    enabled: bool,
    disabled: bool,
    json: bool,
) -> anyhow::Result<()> {
    let client = Client::new();
    let mut url = format!("{}/api/jobs", base_url(host, port));

    if enabled {
        url.push_str("?enabled=true");
    } else if disabled {
        url.push_str("?enabled=false");
    }

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let body = read_json(response, &[]).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let empty_vec = vec![];
    let jobs = body.as_array().unwrap_or(&empty_vec);

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<16}{:<16}{:<9}{:<9}{:<18}{:<18}{:<8}{:<8}",
        "ID", "SCHEDULE", "ENABLED", "RUNNING", "LAST RUN", "NEXT RUN", "RUNS", "OK %"
    );

    let now = Utc::now();
    for job in jobs {
        println!(
            "{:<16}{:<16}{:<9}{:<9}{:<18}{:<18}{:<8}{:<8}",
            job["id"].as_str().unwrap_or("?"),
            job["schedule"].as_str().unwrap_or("?"),
            if job["enabled"].as_bool().unwrap_or(false) { "yes" } else { "no" },
            if job["running"].as_bool().unwrap_or(false) { "yes" } else { "no" },
            relative_field(&job["last_run"], now),
            relative_field(&job["next_run_at"], now),
            job["run_count"].as_u64().unwrap_or(0),
            job["success_rate"].as_f64().unwrap_or(0.0),
        );
    }

    Ok(())
}

/// vingest trigger
pub async fn cmd_trigger(host: &str, port: u16, job: &str, wait: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let mut url = format!("{}/api/jobs/{}/run", base_url(host, port), job);
    if wait {
        url.push_str("?wait=true");
    }

    let response = client
        .post(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let body = read_json(response, &[]).await?;

    if wait {
        let outcome: RunOutcome = serde_json::from_value(body)?;
        super::daemon::print_outcome(&outcome);
        if !outcome.success {
            anyhow::bail!("Job '{}' failed", outcome.job_id);
        }
    } else {
        println!(
            "Job '{}' triggered (run {}).",
            job,
            body["run_id"].as_str().unwrap_or("?")
        );
    }
    Ok(())
}

/// vingest set
pub async fn cmd_set(
    host: &str,
    port: u16,
    job: &str,
    schedule: Option<&str>,
    enabled: Option<bool>,
) -> anyhow::Result<()> {
    if schedule.is_none() && enabled.is_none() {
        anyhow::bail!("Nothing to change: pass --schedule, --enable or --disable");
    }

    let update = JobConfigUpdate {
        schedule: schedule.map(str::to_string),
        enabled,
    };

    let client = Client::new();
    let url = format!("{}/api/jobs/{}", base_url(host, port), job);
    let response = client
        .patch(&url)
        .json(&update)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let body = read_json(response, &[]).await?;

    println!(
        "Job '{}' updated: schedule '{}', {}.",
        job,
        body["schedule"].as_str().unwrap_or("?"),
        if body["enabled"].as_bool().unwrap_or(false) { "enabled" } else { "disabled" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_relative_time_past_and_future() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let past = now - chrono::Duration::minutes(5);
        let future = now + chrono::Duration::hours(3);
        assert_eq!(format_relative_time(&past, now), "5 minutes ago");
        assert_eq!(format_relative_time(&future, now), "in 3 hours");
    }

    #[test]
    fn test_distant_time_is_absolute() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let next_year = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_relative_time(&next_year, now), "2026-01-01T00:00:00Z");
        assert_eq!(
            relative_field(&Value::String("2025-06-15T11:58:00+00:00".into()), now),
            "2 minutes ago"
        );
    }

    #[test]
    fn test_relative_field_missing_is_dash() {
        assert_eq!(relative_field(&Value::Null, Utc::now()), "-");
        assert_eq!(relative_field(&Value::String("garbage".into()), Utc::now()), "-");
    }

    #[tokio::test]
    async fn test_set_without_changes_fails_before_request() {
        let err = cmd_set("127.0.0.1", 1, "a", None, None).await.unwrap_err();
        assert!(err.to_string().contains("Nothing to change"));
    }
}
