pub mod config;
pub mod health;
pub mod job;
pub mod raw;
pub mod timestamp;
pub mod vacancy;

pub use config::{AppConfig, JobConfig, SourceConfig, StoreKind};
pub use health::{HealthStatus, JobHealthSnapshot, LastJobError};
pub use job::{JobConfigUpdate, JobSummary, NewScheduledJob, ScheduledJob};
pub use raw::{
    ApiVacancy, ChannelMessage, HtmlListItem, HtmlVacancy, PageSelector, RawDetailResult,
    RawListResult, RawSourceItem, RawVacancy,
};
pub use vacancy::{CanonicalVacancyRecord, NaturalKey, SalaryRange};
