use std::sync::Arc;

use crate::models::{CanonicalVacancyRecord, NaturalKey};
use crate::storage::{StoreError, VacancyStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    /// The store already held the key; not an error.
    Duplicate,
}

/// Two-layer deduplication over a [`VacancyStore`]: a cheap pre-check by
/// natural key, and the store's uniqueness constraint as the final word.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn VacancyStore>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn VacancyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn VacancyStore> {
        &self.store
    }

    /// Best-effort pre-check. Callers treat an error as "exists".
    pub async fn exists(&self, key: &NaturalKey) -> Result<bool, StoreError> {
        Ok(self.store.find_by_key(key).await?.is_some())
    }

    /// Insert a record, reporting a uniqueness violation as [`InsertOutcome::Duplicate`].
    pub async fn insert(&self, record: CanonicalVacancyRecord) -> Result<InsertOutcome, StoreError> {
        let key = record.natural_key();
        match self.store.create(record).await {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(StoreError::Duplicate { .. }) => {
                tracing::debug!("Skipping duplicate vacancy {}", key);
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }
}
