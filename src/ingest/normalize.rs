//! Raw vendor payload → [`CanonicalVacancyRecord`].
//!
//! One transformer per [`RawVacancy`] variant. Every transformer stamps the
//! adapter's source id and derives the natural key; skills are trimmed,
//! lower-cased and deduplicated; salary bounds go through [`SalaryRange::new`]
//! so the midpoint is derived in one place.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

use crate::models::raw::{ApiVacancy, ChannelMessage, HtmlVacancy};
use crate::models::timestamp::parse_timestamp;
use crate::models::{CanonicalVacancyRecord, RawVacancy, SalaryRange};

const MAX_TITLE_CHARS: usize = 160;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("{source_id}: record has no external id")]
    MissingExternalId { source_id: String },

    #[error("{source_id}:{external_id}: missing required field '{field}'")]
    MissingField {
        source_id: String,
        external_id: String,
        field: &'static str,
    },

    #[error("Failed to capture raw payload: {0}")]
    Serialization(String),
}

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:[ \u{00A0}\u{202F},]\d{3})+|\d+)\s*([kк])?\b").unwrap()
});
static LOWER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:от|from|min|minimum)\b").unwrap());
static UPPER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:до|up\s+to|to|max|maximum)\b").unwrap());
static SALARY_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:salary|compensation|зп|з/п|зарплата|оклад|вилка)\b").unwrap()
});
static HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#([\p{L}\p{N}_+\-]+)").unwrap());
static CURRENCIES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("RUB", Regex::new(r"(?i)₽|\bруб|\b(?:rub|rur)\b").unwrap()),
        ("USD", Regex::new(r"(?i)\$|\busd\b").unwrap()),
        ("EUR", Regex::new(r"(?i)€|\beur\b").unwrap()),
    ]
});
static COMPANY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:company|компания|employer)\s*[:\-–]\s*(.+?)\s*$").unwrap()
});
static LOCATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:location|локация|город|city)\s*[:\-–]\s*(.+?)\s*$").unwrap()
});

/// Map one raw payload onto the canonical shape.
pub fn normalize(
    source_id: &str,
    raw: RawVacancy,
    ingested_at: DateTime<Utc>,
) -> Result<CanonicalVacancyRecord, NormalizeError> {
    let payload =
        serde_json::to_value(&raw).map_err(|e| NormalizeError::Serialization(e.to_string()))?;
    let mut record = match raw {
        RawVacancy::RestApi(v) => from_rest_api(source_id, v, ingested_at)?,
        RawVacancy::Html(v) => from_html(source_id, v, ingested_at)?,
        RawVacancy::Channel(m) => from_channel(source_id, m, ingested_at)?,
    };
    record.raw = payload;
    Ok(record)
}

pub fn normalize_skills<I, S>(skills: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    skills
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

fn require_id(source: &str, id: &str) -> Result<String, NormalizeError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(NormalizeError::MissingExternalId {
            source_id: source.to_string(),
        });
    }
    Ok(id.to_string())
}

fn require_title(
    source: &str,
    external_id: &str,
    title: Option<String>,
) -> Result<String, NormalizeError> {
    clean(title).ok_or_else(|| NormalizeError::MissingField {
        source_id: source.to_string(),
        external_id: external_id.to_string(),
        field: "title",
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn from_rest_api(
    source: &str,
    v: ApiVacancy,
    ingested_at: DateTime<Utc>,
) -> Result<CanonicalVacancyRecord, NormalizeError> {
    let external_id = require_id(source, &v.id)?;
    let title = require_title(source, &external_id, Some(v.name))?;
    let salary = v
        .salary
        .and_then(|s| SalaryRange::new(s.from, s.to, s.currency));

    Ok(CanonicalVacancyRecord {
        source: source.to_string(),
        external_id,
        url: clean(v.alternate_url),
        title,
        company: clean(v.employer.map(|e| e.name)),
        location: clean(v.area.map(|a| a.name)),
        skills: normalize_skills(v.key_skills.iter().map(|s| s.name.as_str())),
        salary,
        published_at: v.published_at.as_deref().and_then(parse_timestamp),
        ingested_at,
        raw: serde_json::Value::Null,
    })
}

fn from_html(
    source: &str,
    v: HtmlVacancy,
    ingested_at: DateTime<Utc>,
) -> Result<CanonicalVacancyRecord, NormalizeError> {
    let external_id = require_id(source, &v.slug)?;
    let title = require_title(source, &external_id, v.title)?;

    Ok(CanonicalVacancyRecord {
        source: source.to_string(),
        external_id,
        url: clean(Some(v.url)),
        title,
        company: clean(v.company),
        location: clean(v.location),
        skills: normalize_skills(&v.skills),
        salary: v.salary_text.as_deref().and_then(parse_salary_text),
        published_at: v.published_at.as_deref().and_then(parse_timestamp),
        ingested_at,
        raw: serde_json::Value::Null,
    })
}

fn from_channel(
    source: &str,
    m: ChannelMessage,
    ingested_at: DateTime<Utc>,
) -> Result<CanonicalVacancyRecord, NormalizeError> {
    let external_id = crate::models::raw::channel_external_id(&m.channel, m.message_id);

    let title = m
        .text
        .lines()
        .map(|line| HASHTAG.replace_all(line, "").trim().to_string())
        .find(|line| !line.is_empty())
        .map(|line| truncate_chars(&line, MAX_TITLE_CHARS));
    let title = require_title(source, &external_id, title)?;

    let skills = normalize_skills(
        HASHTAG
            .captures_iter(&m.text)
            .filter_map(|c| c.get(1))
            .map(|g| g.as_str()),
    );

    let salary = m
        .text
        .lines()
        .find(|line| currency_of(line).is_some() || SALARY_KEYWORD.is_match(line))
        .and_then(parse_salary_text);

    let capture = |re: &Regex| {
        re.captures(&m.text)
            .and_then(|c| c.get(1))
            .map(|g| g.as_str().to_string())
    };

    Ok(CanonicalVacancyRecord {
        source: source.to_string(),
        external_id,
        url: clean(Some(m.url.clone())),
        title,
        company: clean(capture(&COMPANY_LINE)),
        location: clean(capture(&LOCATION_LINE)),
        skills,
        salary,
        published_at: m.published_at.as_deref().and_then(parse_timestamp),
        ingested_at,
        raw: serde_json::Value::Null,
    })
}

fn currency_of(text: &str) -> Option<&'static str> {
    CURRENCIES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(code, _)| *code)
}

fn parse_amount(digits: &str, thousands: bool) -> Option<i64> {
    let cleaned: String = digits.chars().filter(|c| c.is_ascii_digit()).collect();
    let value: i64 = cleaned.parse().ok()?;
    if thousands {
        value.checked_mul(1000)
    } else {
        Some(value)
    }
}

/// Parse free-form salary text such as `"100 000 – 150 000 ₽"`,
/// `"from $3000"` or `"до 200000 руб."`.
///
/// Two amounts are a range. A single amount is a lower bound unless the
/// nearest preceding marker says "up to".
pub fn parse_salary_text(text: &str) -> Option<SalaryRange> {
    let amounts: Vec<(usize, i64)> = AMOUNT
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let value = parse_amount(c.get(1)?.as_str(), c.get(2).is_some())?;
            Some((whole.start(), value))
        })
        .collect();

    let currency = currency_of(text).map(str::to_string);

    match amounts.as_slice() {
        [] => None,
        [(start, value)] => {
            let prefix = &text[..*start];
            let last_lower = LOWER_MARKER.find_iter(prefix).last().map(|m| m.start());
            let last_upper = UPPER_MARKER.find_iter(prefix).last().map(|m| m.start());
            let is_upper = match (last_lower, last_upper) {
                (Some(l), Some(u)) => u > l,
                (None, Some(_)) => true,
                _ => false,
            };
            if is_upper {
                SalaryRange::new(None, Some(*value), currency)
            } else {
                SalaryRange::new(Some(*value), None, currency)
            }
        }
        [(_, min), (_, max), ..] => SalaryRange::new(Some(*min), Some(*max), currency),
    }
}
