use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity used for deduplication: `(source, external_id)`.
///
/// When a source has no external id the adapter derives a natural key
/// instead (e.g. `channel/message_id`), stored in the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub source: String,
    pub external_id: String,
}

impl NaturalKey {
    pub fn new(source: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.external_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SalaryRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub currency: Option<String>,
    /// Present only when both bounds are known.
    pub midpoint: Option<i64>,
}

impl SalaryRange {
    /// Build a range, swapping inverted bounds and deriving the midpoint.
    /// Returns `None` when neither bound is known.
    pub fn new(min: Option<i64>, max: Option<i64>, currency: Option<String>) -> Option<Self> {
        let (min, max) = match (min, max) {
            (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
            other => other,
        };
        if min.is_none() && max.is_none() {
            return None;
        }
        let midpoint = match (min, max) {
            (Some(a), Some(b)) => {
                // Lies between the bounds, so it always fits back into i64.
                Some((i128::from(a) + i128::from(b)).div_euclid(2) as i64)
            }
            _ => None,
        };
        let currency = currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());
        Some(Self {
            min,
            max,
            currency,
            midpoint,
        })
    }
}

/// The normalized vacancy shape every source is mapped onto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalVacancyRecord {
    pub source: String,
    pub external_id: String,
    pub url: Option<String>,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub skills: BTreeSet<String>,
    pub salary: Option<SalaryRange>,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    /// Source payload kept verbatim for audit.
    pub raw: serde_json::Value,
}

impl CanonicalVacancyRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.source.clone(), self.external_id.clone())
    }
}
