use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{CanonicalVacancyRecord, NaturalKey};
use crate::storage::{StoreError, VacancyStore};

const FILE_NAME: &str = "vacancies.json";

/// File-backed store that keeps every record in memory and rewrites
/// `vacancies.json` after each successful insert.
pub struct JsonVacancyStore {
    file_path: PathBuf,
    cache: RwLock<HashMap<NaturalKey, CanonicalVacancyRecord>>,
}

impl JsonVacancyStore {
    /// Open the store under `data_dir`, loading existing records if present.
    ///
    /// If `vacancies.json` is corrupted (invalid JSON), a backup is written to
    /// `vacancies.json.bak` and the store starts empty.
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .context("Failed to create data directory")?;

        let file_path = data_dir.join(FILE_NAME);

        let records = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .context("Failed to read vacancies.json")?;
            match serde_json::from_str::<Vec<CanonicalVacancyRecord>>(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(
                        "vacancies.json is corrupted ({}), creating backup and starting empty",
                        e
                    );
                    let backup_path = data_dir.join("vacancies.json.bak");
                    if let Err(backup_err) = tokio::fs::copy(&file_path, &backup_path).await {
                        tracing::error!(
                            "Failed to create backup of corrupted vacancies.json: {}",
                            backup_err
                        );
                    }
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut cache = HashMap::with_capacity(records.len());
        for record in records {
            let key = record.natural_key();
            if cache.contains_key(&key) {
                tracing::warn!("Dropping duplicate record {} found on disk", key);
                continue;
            }
            cache.insert(key, record);
        }

        Ok(Self {
            file_path,
            cache: RwLock::new(cache),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Write the cache to a .tmp file, then rename it over the real file.
    async fn persist(
        &self,
        records: &HashMap<NaturalKey, CanonicalVacancyRecord>,
    ) -> Result<(), StoreError> {
        let mut ordered: Vec<&CanonicalVacancyRecord> = records.values().collect();
        ordered.sort_by(|a, b| {
            a.ingested_at
                .cmp(&b.ingested_at)
                .then_with(|| a.natural_key().cmp(&b.natural_key()))
        });

        let json = serde_json::to_string_pretty(&ordered)?;
        let tmp_path = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &self.file_path).await?;
        Ok(())
    }
}

#[async_trait]
impl VacancyStore for JsonVacancyStore {
    async fn find_by_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<CanonicalVacancyRecord>, StoreError> {
        let cache = self.cache.read().await;
        Ok(cache.get(key).cloned())
    }

    async fn create(
        &self,
        record: CanonicalVacancyRecord,
    ) -> Result<CanonicalVacancyRecord, StoreError> {
        let key = record.natural_key();
        let mut cache = self.cache.write().await;

        if cache.contains_key(&key) {
            return Err(StoreError::duplicate(&key));
        }

        cache.insert(key.clone(), record.clone());
        if let Err(e) = self.persist(&cache).await {
            cache.remove(&key);
            return Err(e);
        }

        Ok(record)
    }

    async fn bulk_create(
        &self,
        records: Vec<CanonicalVacancyRecord>,
    ) -> Result<crate::storage::BulkCreateReport, StoreError> {
        let mut report = crate::storage::BulkCreateReport::default();
        let mut cache = self.cache.write().await;
        let mut inserted = Vec::new();

        for record in records {
            let key = record.natural_key();
            if cache.contains_key(&key) {
                report.duplicates += 1;
                continue;
            }
            cache.insert(key.clone(), record);
            inserted.push(key);
        }

        if inserted.is_empty() {
            return Ok(report);
        }

        if let Err(e) = self.persist(&cache).await {
            for key in &inserted {
                cache.remove(key);
            }
            return Err(e);
        }

        report.created = inserted.len();
        Ok(report)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.cache.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn make_record(source: &str, id: &str) -> CanonicalVacancyRecord {
        CanonicalVacancyRecord {
            source: source.to_string(),
            external_id: id.to_string(),
            url: Some(format!("https://example.com/vacancies/{}", id)),
            title: format!("Rust engineer {}", id),
            company: Some("Acme".to_string()),
            location: None,
            skills: ["rust".to_string(), "tokio".to_string()].into_iter().collect::<BTreeSet<_>>(),
            salary: None,
            published_at: None,
            ingested_at: Utc::now(),
            raw: serde_json::json!({"id": id}),
        }
    }

    async fn setup_store() -> (JsonVacancyStore, TempDir) {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let store = JsonVacancyStore::new(tmp_dir.path().to_path_buf())
            .await
            .expect("create store");
        (store, tmp_dir)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (store, _tmp) = setup_store().await;
        store.create(make_record("hh", "42")).await.expect("create");
        let found = store
            .find_by_key(&NaturalKey::new("hh", "42"))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.title, "Rust engineer 42");
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let (store, _tmp) = setup_store().await;
        store.create(make_record("hh", "42")).await.expect("create");
        let err = store.create(make_record("hh", "42")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Duplicate {
                source_id: "hh".to_string(),
                external_id: "42".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let tmp_dir = TempDir::new().expect("tmp");
        {
            let store = JsonVacancyStore::new(tmp_dir.path().to_path_buf())
                .await
                .expect("store");
            store.create(make_record("hh", "1")).await.unwrap();
            store.create(make_record("board", "1")).await.unwrap();
        }
        let reopened = JsonVacancyStore::new(tmp_dir.path().to_path_buf())
            .await
            .expect("reopen");
        assert_eq!(reopened.count().await.unwrap(), 2);
        let err = reopened.create(make_record("hh", "1")).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_behind() {
        let (store, tmp) = setup_store().await;
        store.create(make_record("hh", "1")).await.unwrap();
        assert!(tmp.path().join("vacancies.json").exists());
        assert!(!tmp.path().join("vacancies.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupted_file_is_backed_up() {
        let tmp_dir = TempDir::new().expect("tmp");
        std::fs::write(tmp_dir.path().join("vacancies.json"), "{not json").unwrap();
        let store = JsonVacancyStore::new(tmp_dir.path().to_path_buf())
            .await
            .expect("store");
        assert_eq!(store.count().await.unwrap(), 0);
        let backup = std::fs::read_to_string(tmp_dir.path().join("vacancies.json.bak"))
            .expect("backup exists");
        assert_eq!(backup, "{not json");
    }

    #[tokio::test]
    async fn test_bulk_create_single_write() {
        let (store, _tmp) = setup_store().await;
        store.create(make_record("hh", "1")).await.unwrap();
        let report = store
            .bulk_create(vec![
                make_record("hh", "1"),
                make_record("hh", "2"),
                make_record("hh", "3"),
            ])
            .await
            .expect("bulk");
        assert_eq!(report.created, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.count().await.unwrap(), 3);
    }
}
