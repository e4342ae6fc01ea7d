use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{CanonicalVacancyRecord, NaturalKey};
use crate::storage::{StoreError, VacancyStore};

/// Process-local store. Used for dry runs and as the reference behaviour in tests.
#[derive(Default)]
pub struct MemoryVacancyStore {
    records: RwLock<HashMap<NaturalKey, CanonicalVacancyRecord>>,
}

impl MemoryVacancyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<CanonicalVacancyRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.natural_key().cmp(&b.natural_key()));
        records
    }
}

#[async_trait]
impl VacancyStore for MemoryVacancyStore {
    async fn find_by_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<CanonicalVacancyRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn create(
        &self,
        record: CanonicalVacancyRecord,
    ) -> Result<CanonicalVacancyRecord, StoreError> {
        let key = record.natural_key();
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(StoreError::duplicate(&key));
        }
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn make_record(source: &str, id: &str) -> CanonicalVacancyRecord {
        CanonicalVacancyRecord {
            source: source.to_string(),
            external_id: id.to_string(),
            url: None,
            title: format!("Vacancy {}", id),
            company: None,
            location: None,
            skills: BTreeSet::new(),
            salary: None,
            published_at: None,
            ingested_at: Utc::now(),
            raw: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let store = MemoryVacancyStore::new();
        store.create(make_record("hh", "1")).await.expect("create");
        let found = store
            .find_by_key(&NaturalKey::new("hh", "1"))
            .await
            .expect("find");
        assert_eq!(found.map(|r| r.title), Some("Vacancy 1".to_string()));
        assert!(store
            .find_by_key(&NaturalKey::new("hh", "2"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = MemoryVacancyStore::new();
        store.create(make_record("hh", "1")).await.unwrap();
        let err = store.create(make_record("hh", "1")).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_external_id_different_source_allowed() {
        let store = MemoryVacancyStore::new();
        store.create(make_record("hh", "1")).await.unwrap();
        store.create(make_record("board", "1")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bulk_create_counts_duplicates() {
        let store = MemoryVacancyStore::new();
        store.create(make_record("hh", "1")).await.unwrap();
        let report = store
            .bulk_create(vec![
                make_record("hh", "1"),
                make_record("hh", "2"),
                make_record("hh", "2"),
                make_record("hh", "3"),
            ])
            .await
            .expect("bulk");
        assert_eq!(report.created, 2);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn test_concurrent_creates_of_same_key_yield_one_record() {
        let store = std::sync::Arc::new(MemoryVacancyStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(make_record("tg", "rustjobs/7")).await
            }));
        }
        let mut created = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => created += 1,
                Err(e) if e.is_duplicate() => duplicates += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(duplicates, 7);
    }
}
