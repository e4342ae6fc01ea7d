use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use crate::daemon::executor::{JobBody, RunReport};
use crate::daemon::scheduler::Clock;
use crate::ingest::dedup::{DedupGate, InsertOutcome};
use crate::ingest::early_exit::{evaluate_page, EarlyExitOptions, PageItemHandler};
use crate::ingest::normalize::normalize;
use crate::ingest::retry::{retry_async, RetryPolicy};
use crate::models::{JobConfig, NaturalKey, RawSourceItem};
use crate::sources::SourceAdapter;

pub const STOP_EMPTY_PAGE: &str = "empty page";
pub const STOP_LAST_PAGE: &str = "no more pages";
pub const STOP_PAGE_LIMIT: &str = "page limit reached";

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub max_pages: u32,
    pub early_exit: EarlyExitOptions,
    /// Fetch each new item's detail page before normalizing.
    pub fetch_details: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_pages: 20,
            early_exit: EarlyExitOptions::default(),
            fetch_details: true,
        }
    }
}

impl IngestOptions {
    pub fn from_job(job: &JobConfig) -> Self {
        Self {
            max_pages: job.max_pages,
            early_exit: EarlyExitOptions {
                min_new_items: job.min_new_items,
                max_existing_ratio: job.max_existing_ratio,
            },
            fetch_details: job.fetch_details,
        }
    }
}

/// Crawl one or more adapters newest-first, persisting unseen vacancies.
///
/// A failed crawl is retried from the first page; items stored by the failed
/// attempt are recognised as existing, so retries are idempotent.
pub struct SourceIngestJob {
    job_id: String,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    gate: DedupGate,
    options: IngestOptions,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl SourceIngestJob {
    pub fn new(
        job_id: impl Into<String>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        gate: DedupGate,
        options: IngestOptions,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            adapters,
            gate,
            options,
            retry,
            clock,
        }
    }

    pub fn from_config(
        job: &JobConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        gate: DedupGate,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            job.id.clone(),
            adapters,
            gate,
            IngestOptions::from_job(job),
            RetryPolicy::new(job.retry_attempts, Duration::from_secs(job.retry_delay_secs)),
            clock,
        )
    }

    /// Walk one adapter's pages in order until a stop condition is met.
    pub async fn crawl(&self, adapter: &dyn SourceAdapter) -> anyhow::Result<RunReport> {
        let source_id = adapter.source_id();
        let handler = PageHandler {
            adapter,
            gate: &self.gate,
            fetch_details: self.options.fetch_details,
            clock: self.clock.as_ref(),
            created: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
            invalid: AtomicUsize::new(0),
        };

        let mut report = RunReport::default();
        let mut selector = adapter.first_page();

        loop {
            if report.pages_fetched as u32 >= self.options.max_pages {
                report.stop_reason = Some(STOP_PAGE_LIMIT.to_string());
                break;
            }

            let page = adapter
                .fetch_list_page(&selector)
                .await
                .with_context(|| format!("{}: failed to fetch list page {:?}", source_id, selector))?;
            report.pages_fetched += 1;

            if page.items.is_empty() {
                match page.next {
                    // Nothing to evaluate here, but the source says older pages exist.
                    Some(next) => {
                        tracing::debug!(
                            "[job {}] {} page {:?} has no candidates, moving on",
                            self.job_id,
                            source_id,
                            selector
                        );
                        selector = next;
                        continue;
                    }
                    None => {
                        report.stop_reason = Some(STOP_EMPTY_PAGE.to_string());
                        break;
                    }
                }
            }
            report.items_seen += page.items.len();

            let outcome = evaluate_page(&page.items, &handler, &self.options.early_exit)
                .await
                .with_context(|| format!("{}: failed to process page {:?}", source_id, selector))?;
            report.new_items += outcome.new_count;
            report.existing_items += outcome.existing_count;

            tracing::debug!(
                "[job {}] {} page {:?}: {} new, {} existing",
                self.job_id,
                source_id,
                selector,
                outcome.new_count,
                outcome.existing_count
            );

            if !outcome.should_continue {
                report.stop_reason = outcome.stop_reason;
                break;
            }

            match page.next {
                Some(next) => selector = next,
                None => {
                    report.stop_reason = Some(STOP_LAST_PAGE.to_string());
                    break;
                }
            }
        }

        report.created = handler.created.load(Ordering::SeqCst);
        report.duplicates = handler.duplicates.load(Ordering::SeqCst);
        report.invalid = handler.invalid.load(Ordering::SeqCst);
        Ok(report)
    }
}

#[async_trait]
impl JobBody for SourceIngestJob {
    async fn run(&self) -> anyhow::Result<RunReport> {
        let mut total = RunReport::default();
        let mut failures = Vec::new();

        for adapter in &self.adapters {
            let label = format!("[job {}] crawl of {}", self.job_id, adapter.source_id());
            let result = retry_async(self.retry, &label, |_| true, || {
                self.crawl(adapter.as_ref())
            })
            .await;

            match result {
                Ok(report) => {
                    tracing::info!(
                        "[job {}] {}: {} pages, {} created, {} duplicates, {} invalid ({})",
                        self.job_id,
                        adapter.source_id(),
                        report.pages_fetched,
                        report.created,
                        report.duplicates,
                        report.invalid,
                        report.stop_reason.as_deref().unwrap_or("-")
                    );
                    total.merge(report);
                }
                Err(e) => failures.push(format!("{:#}", e)),
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("{}", failures.join("; "));
        }
        Ok(total)
    }
}

struct PageHandler<'a> {
    adapter: &'a dyn SourceAdapter,
    gate: &'a DedupGate,
    fetch_details: bool,
    clock: &'a dyn Clock,
    created: AtomicUsize,
    duplicates: AtomicUsize,
    invalid: AtomicUsize,
}

#[async_trait]
impl<'a> PageItemHandler<RawSourceItem> for PageHandler<'a> {
    async fn check_exists(&self, item: &RawSourceItem) -> anyhow::Result<bool> {
        let key = NaturalKey::new(self.adapter.source_id(), item.external_id());
        Ok(self.gate.exists(&key).await?)
    }

    async fn process_new(&self, item: &RawSourceItem) -> anyhow::Result<()> {
        let source_id = self.adapter.source_id();

        let raw = if self.fetch_details {
            match self.adapter.fetch_detail_page(item).await {
                Ok(raw) => raw,
                Err(e) if e.is_gone() => {
                    tracing::warn!("{}: skipping {}: {}", source_id, item.external_id(), e);
                    self.invalid.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            item.clone().into_vacancy()
        };

        let record = match normalize(source_id, raw, self.clock.now()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping unusable vacancy: {}", e);
                self.invalid.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        };

        match self.gate.insert(record).await? {
            InsertOutcome::Created => self.created.fetch_add(1, Ordering::SeqCst),
            InsertOutcome::Duplicate => self.duplicates.fetch_add(1, Ordering::SeqCst),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::scheduler::FakeClock;
    use crate::models::{ApiVacancy, PageSelector, RawDetailResult, RawListResult, RawVacancy};
    use crate::sources::FetchError;
    use crate::storage::memory::MemoryVacancyStore;
    use crate::storage::VacancyStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn api_item(id: &str) -> RawSourceItem {
        RawSourceItem::RestApi(ApiVacancy {
            id: id.to_string(),
            name: format!("Vacancy {}", id),
            alternate_url: None,
            employer: None,
            area: None,
            salary: None,
            published_at: None,
            key_skills: Vec::new(),
            description: None,
        })
    }

    /// Serves fixed pages of REST items; page `n` is `pages[n]`.
    struct StaticAdapter {
        pages: Vec<Vec<RawSourceItem>>,
        list_calls: Mutex<Vec<u32>>,
        fail_list_once: Mutex<bool>,
        gone: Vec<String>,
    }

    impl StaticAdapter {
        fn new(pages: Vec<Vec<RawSourceItem>>) -> Self {
            Self {
                pages,
                list_calls: Mutex::new(Vec::new()),
                fail_list_once: Mutex::new(false),
                gone: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn source_id(&self) -> &str {
            "board"
        }

        fn first_page(&self) -> PageSelector {
            PageSelector::Number(0)
        }

        async fn fetch_list_page(
            &self,
            selector: &PageSelector,
        ) -> Result<RawListResult, FetchError> {
            let PageSelector::Number(n) = selector else {
                panic!("unexpected selector");
            };
            self.list_calls.lock().unwrap().push(*n);
            {
                let mut fail = self.fail_list_once.lock().unwrap();
                if *fail {
                    *fail = false;
                    return Err(FetchError::Timeout {
                        url: format!("page {}", n),
                    });
                }
            }
            let items = self.pages.get(*n as usize).cloned().unwrap_or_default();
            let next = if (*n as usize) + 1 < self.pages.len() {
                Some(PageSelector::Number(n + 1))
            } else {
                None
            };
            Ok(RawListResult { items, next })
        }

        async fn fetch_detail_page(
            &self,
            item: &RawSourceItem,
        ) -> Result<RawDetailResult, FetchError> {
            if self.gone.contains(&item.external_id()) {
                return Err(FetchError::Status {
                    url: item.external_id(),
                    status: 404,
                });
            }
            Ok(item.clone().into_vacancy())
        }
    }

    fn make_job(
        adapter: Arc<StaticAdapter>,
        store: Arc<MemoryVacancyStore>,
        options: IngestOptions,
    ) -> SourceIngestJob {
        let clock = Arc::new(FakeClock::new(Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()));
        SourceIngestJob::new(
            "board-sync",
            vec![adapter as Arc<dyn SourceAdapter>],
            DedupGate::new(store),
            options,
            RetryPolicy::new(2, Duration::from_millis(1)),
            clock,
        )
    }

    #[tokio::test]
    async fn test_crawls_until_last_page() {
        let adapter = Arc::new(StaticAdapter::new(vec![
            vec![api_item("5"), api_item("4")],
            vec![api_item("3"), api_item("2")],
            vec![api_item("1")],
        ]));
        let store = Arc::new(MemoryVacancyStore::new());
        let job = make_job(adapter.clone(), store.clone(), IngestOptions::default());

        let report = job.run().await.expect("run");
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.created, 5);
        assert_eq!(report.stop_reason.as_deref(), Some(STOP_LAST_PAGE));
        assert_eq!(*adapter.list_calls.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_second_run_stops_after_first_page() {
        let adapter = Arc::new(StaticAdapter::new(vec![
            vec![api_item("5"), api_item("4")],
            vec![api_item("3")],
        ]));
        let store = Arc::new(MemoryVacancyStore::new());
        let job = make_job(adapter.clone(), store.clone(), IngestOptions::default());

        job.run().await.expect("first run");
        adapter.list_calls.lock().unwrap().clear();

        let report = job.run().await.expect("second run");
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(report.new_items, 0);
        assert_eq!(report.existing_items, 2);
        assert_eq!(report.created, 0);
        assert_eq!(
            report.stop_reason.as_deref(),
            Some(crate::ingest::early_exit::STOP_TOO_FEW_NEW)
        );
        assert_eq!(*adapter.list_calls.lock().unwrap(), vec![0]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_page_limit() {
        let adapter = Arc::new(StaticAdapter::new(vec![
            vec![api_item("3")],
            vec![api_item("2")],
            vec![api_item("1")],
        ]));
        let store = Arc::new(MemoryVacancyStore::new());
        let options = IngestOptions {
            max_pages: 2,
            ..IngestOptions::default()
        };
        let report = make_job(adapter, store, options).run().await.expect("run");
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.stop_reason.as_deref(), Some(STOP_PAGE_LIMIT));
    }

    #[tokio::test]
    async fn test_empty_page_stops() {
        let adapter = Arc::new(StaticAdapter::new(vec![Vec::new()]));
        let store = Arc::new(MemoryVacancyStore::new());
        let report = make_job(adapter, store, IngestOptions::default())
            .run()
            .await
            .expect("run");
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(report.stop_reason.as_deref(), Some(STOP_EMPTY_PAGE));
    }

    #[tokio::test]
    async fn test_empty_page_with_next_moves_on() {
        let adapter = Arc::new(StaticAdapter::new(vec![Vec::new(), vec![api_item("1")]]));
        let store = Arc::new(MemoryVacancyStore::new());
        let report = make_job(adapter.clone(), store, IngestOptions::default())
            .run()
            .await
            .expect("run");
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.stop_reason.as_deref(), Some(STOP_LAST_PAGE));
        assert_eq!(*adapter.list_calls.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_from_first_page() {
        let adapter = Arc::new(StaticAdapter::new(vec![vec![api_item("1")]]));
        *adapter.fail_list_once.lock().unwrap() = true;
        let store = Arc::new(MemoryVacancyStore::new());
        let report = make_job(adapter.clone(), store.clone(), IngestOptions::default())
            .run()
            .await
            .expect("run");
        assert_eq!(report.created, 1);
        assert_eq!(*adapter.list_calls.lock().unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_gone_detail_is_skipped_as_invalid() {
        let mut adapter = StaticAdapter::new(vec![vec![api_item("2"), api_item("1")]]);
        adapter.gone.push("2".to_string());
        let adapter = Arc::new(adapter);
        let store = Arc::new(MemoryVacancyStore::new());
        let report = make_job(adapter, store.clone(), IngestOptions::default())
            .run()
            .await
            .expect("run");
        assert_eq!(report.invalid, 1);
        assert_eq!(report.created, 1);
        assert!(store
            .find_by_key(&NaturalKey::new("board", "2"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_records_are_stamped_with_source_and_clock() {
        let adapter = Arc::new(StaticAdapter::new(vec![vec![api_item("9")]]));
        let store = Arc::new(MemoryVacancyStore::new());
        make_job(adapter, store.clone(), IngestOptions::default())
            .run()
            .await
            .expect("run");
        let record = store
            .find_by_key(&NaturalKey::new("board", "9"))
            .await
            .unwrap()
            .expect("stored");
        assert_eq!(record.source, "board");
        assert_eq!(
            record.ingested_at,
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
        );
        assert!(matches!(
            serde_json::from_value::<RawVacancy>(record.raw).unwrap(),
            RawVacancy::RestApi(_)
        ));
    }
}
