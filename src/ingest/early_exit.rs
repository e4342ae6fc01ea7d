use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const STOP_TOO_FEW_NEW: &str = "too few new items";
pub const STOP_TOO_MANY_EXISTING: &str = "too many existing items";

/// Thresholds deciding whether a crawl should fetch the next page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyExitOptions {
    pub min_new_items: usize,
    pub max_existing_ratio: f64,
}

impl Default for EarlyExitOptions {
    fn default() -> Self {
        Self {
            min_new_items: 1,
            max_existing_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlPageOutcome {
    pub new_count: usize,
    pub existing_count: usize,
    pub total_count: usize,
    pub should_continue: bool,
    /// Set only when `should_continue` is false.
    pub stop_reason: Option<String>,
}

impl CrawlPageOutcome {
    pub fn existing_ratio(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.existing_count as f64 / self.total_count as f64
        }
    }
}

/// Per-item callbacks used while evaluating one page.
#[async_trait]
pub trait PageItemHandler<T: Sync>: Send + Sync {
    /// Whether the item is already known. An error is treated as "known".
    async fn check_exists(&self, item: &T) -> anyhow::Result<bool>;

    /// Handle an item that was not known. Errors abort the page.
    async fn process_new(&self, item: &T) -> anyhow::Result<()>;
}

/// Walk a page in order, counting new and known items, then decide whether
/// the crawl should continue.
///
/// Assumes the source lists newest items first in a stable order; a page of
/// mostly known items then means everything older is known too.
pub async fn evaluate_page<T, H>(
    items: &[T],
    handler: &H,
    options: &EarlyExitOptions,
) -> anyhow::Result<CrawlPageOutcome>
where
    T: Sync,
    H: PageItemHandler<T> + ?Sized,
{
    let mut new_count = 0;
    let mut existing_count = 0;

    for item in items {
        let exists = match handler.check_exists(item).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!("Existence check failed, counting item as existing: {:#}", e);
                true
            }
        };

        if exists {
            existing_count += 1;
        } else {
            handler.process_new(item).await?;
            new_count += 1;
        }
    }

    let mut outcome = CrawlPageOutcome {
        new_count,
        existing_count,
        total_count: items.len(),
        should_continue: true,
        stop_reason: None,
    };

    // When both thresholds fail the ratio is reported.
    if outcome.existing_ratio() > options.max_existing_ratio {
        outcome.should_continue = false;
        outcome.stop_reason = Some(STOP_TOO_MANY_EXISTING.to_string());
    } else if new_count < options.min_new_items {
        outcome.should_continue = false;
        outcome.stop_reason = Some(STOP_TOO_FEW_NEW.to_string());
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Known ids are "existing"; ids listed in `broken` make the checker fail.
    struct RecordingHandler {
        known: HashSet<u32>,
        broken: HashSet<u32>,
        processed: Mutex<Vec<u32>>,
    }

    impl RecordingHandler {
        fn new(known: &[u32]) -> Self {
            Self {
                known: known.iter().copied().collect(),
                broken: HashSet::new(),
                processed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageItemHandler<u32> for RecordingHandler {
        async fn check_exists(&self, item: &u32) -> anyhow::Result<bool> {
            if self.broken.contains(item) {
                anyhow::bail!("lookup failed for {}", item);
            }
            Ok(self.known.contains(item))
        }

        async fn process_new(&self, item: &u32) -> anyhow::Result<()> {
            self.processed.lock().unwrap().push(*item);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_new_continues() {
        let handler = RecordingHandler::new(&[]);
        let items: Vec<u32> = (1..=10).collect();
        let outcome = evaluate_page(&items, &handler, &EarlyExitOptions::default())
            .await
            .expect("evaluate");
        assert_eq!(outcome.new_count, 10);
        assert_eq!(outcome.existing_count, 0);
        assert!(outcome.should_continue);
        assert!(outcome.stop_reason.is_none());
        assert_eq!(*handler.processed.lock().unwrap(), items);
    }

    #[tokio::test]
    async fn test_all_existing_with_ratio_limit_stops() {
        let items: Vec<u32> = (1..=10).collect();
        let handler = RecordingHandler::new(&items);
        let options = EarlyExitOptions {
            max_existing_ratio: 0.5,
            ..EarlyExitOptions::default()
        };
        let outcome = evaluate_page(&items, &handler, &options).await.expect("evaluate");
        assert!(!outcome.should_continue);
        assert_eq!(outcome.stop_reason.as_deref(), Some(STOP_TOO_MANY_EXISTING));
        assert_eq!(outcome.existing_ratio(), 1.0);
        assert!(handler.processed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_new_four_existing_continues_with_defaults() {
        let handler = RecordingHandler::new(&[2, 3, 4, 5]);
        let items = vec![1, 2, 3, 4, 5];
        let outcome = evaluate_page(&items, &handler, &EarlyExitOptions::default())
            .await
            .expect("evaluate");
        assert_eq!(outcome.new_count, 1);
        assert_eq!(outcome.existing_count, 4);
        assert!(outcome.should_continue);
        assert!(outcome.stop_reason.is_none());
    }

    #[tokio::test]
    async fn test_zero_new_stops_with_defaults() {
        let handler = RecordingHandler::new(&[1, 2]);
        let outcome = evaluate_page(&[1, 2], &handler, &EarlyExitOptions::default())
            .await
            .expect("evaluate");
        assert!(!outcome.should_continue);
        assert_eq!(outcome.stop_reason.as_deref(), Some(STOP_TOO_FEW_NEW));
    }

    #[tokio::test]
    async fn test_checker_error_counts_as_existing() {
        let mut handler = RecordingHandler::new(&[]);
        handler.broken.insert(2);
        let outcome = evaluate_page(&[1, 2, 3], &handler, &EarlyExitOptions::default())
            .await
            .expect("evaluate");
        assert_eq!(outcome.new_count, 2);
        assert_eq!(outcome.existing_count, 1);
        assert_eq!(*handler.processed.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_empty_page_has_zero_ratio() {
        let handler = RecordingHandler::new(&[]);
        let items: Vec<u32> = Vec::new();
        let options = EarlyExitOptions {
            min_new_items: 0,
            max_existing_ratio: 0.0,
        };
        let outcome = evaluate_page(&items, &handler, &options).await.expect("evaluate");
        assert_eq!(outcome.total_count, 0);
        assert_eq!(outcome.existing_ratio(), 0.0);
        assert!(outcome.should_continue);
    }

    #[tokio::test]
    async fn test_process_new_error_propagates() {
        struct Failing;

        #[async_trait]
        impl PageItemHandler<u32> for Failing {
            async fn check_exists(&self, _item: &u32) -> anyhow::Result<bool> {
                Ok(false)
            }
            async fn process_new(&self, _item: &u32) -> anyhow::Result<()> {
                anyhow::bail!("store unavailable")
            }
        }

        let err = evaluate_page(&[1], &Failing, &EarlyExitOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("store unavailable"));
    }
}
