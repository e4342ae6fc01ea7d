//! Source-agnostic ingestion: crawl strategy, normalization, deduplication.

pub mod dedup;
pub mod early_exit;
pub mod normalize;
pub mod pipeline;
pub mod retry;

pub use dedup::{DedupGate, InsertOutcome};
pub use early_exit::{evaluate_page, CrawlPageOutcome, EarlyExitOptions, PageItemHandler};
pub use pipeline::{IngestOptions, SourceIngestJob};
pub use retry::RetryPolicy;
