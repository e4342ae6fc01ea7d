pub mod json;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CanonicalVacancyRecord, NaturalKey};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The `(source, external_id)` uniqueness constraint rejected a write.
    #[error("Duplicate key: {source_id}:{external_id}")]
    Duplicate {
        source_id: String,
        external_id: String,
    },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn duplicate(key: &NaturalKey) -> Self {
        StoreError::Duplicate {
            source_id: key.source.clone(),
            external_id: key.external_id.clone(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result of a bulk insert; duplicates are not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkCreateReport {
    pub created: usize,
    pub duplicates: usize,
    pub errors: usize,
}

/// Persistence collaborator for canonical vacancy records.
///
/// Implementations must enforce uniqueness of `(source, external_id)` and
/// report a violation as [`StoreError::Duplicate`].
#[async_trait]
pub trait VacancyStore: Send + Sync {
    async fn find_by_key(&self, key: &NaturalKey)
        -> Result<Option<CanonicalVacancyRecord>, StoreError>;

    async fn create(
        &self,
        record: CanonicalVacancyRecord,
    ) -> Result<CanonicalVacancyRecord, StoreError>;

    async fn bulk_create(
        &self,
        records: Vec<CanonicalVacancyRecord>,
    ) -> Result<BulkCreateReport, StoreError> {
        let mut report = BulkCreateReport::default();
        for record in records {
            match self.create(record).await {
                Ok(_) => report.created += 1,
                Err(e) if e.is_duplicate() => report.duplicates += 1,
                Err(e) => {
                    tracing::warn!("Bulk insert of one record failed: {}", e);
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    async fn count(&self) -> Result<usize, StoreError>;
}
