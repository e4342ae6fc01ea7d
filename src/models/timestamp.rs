//! The one place where source date strings become `DateTime<Utc>` and back.
//!
//! Adapters hand raw strings through untouched; normalization and the CLI
//! call [`parse_timestamp`]. The CLI prints absolute times with
//! [`format_timestamp`]. Stored and streamed records use chrono's serde form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Parse a timestamp as published by a source.
///
/// Accepted shapes:
/// - RFC 3339 (`2025-06-15T10:00:00Z`, `2025-06-15T10:00:00+03:00`)
/// - compact offsets (`2025-06-15T10:00:00+0300`)
/// - naive date-times, read as UTC (`2025-06-15T10:00:00`, `2025-06-15 10:00:00`)
/// - plain dates, read as midnight UTC (`2025-06-15`)
/// - unix seconds (`1749981600`)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(secs) = s.parse::<i64>() {
            return DateTime::from_timestamp(secs, 0);
        }
    }
    None
}

/// Canonical wire form: RFC 3339, UTC, second precision.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
