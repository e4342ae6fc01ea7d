use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationErrors;
use crate::models::job::{validate_new_job, NewScheduledJob};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Json,
    Memory,
}

/// Connection parameters shared by every source kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSettings {
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_transport_retries")]
    pub max_retries: u32,
    #[serde(default = "default_transport_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl HttpSettings {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_request_timeout_secs(),
            max_retries: default_transport_retries(),
            retry_delay_ms: default_transport_retry_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    RestApi(RestApiSourceConfig),
    Html(HtmlSourceConfig),
    Channel(ChannelSourceConfig),
}

impl SourceConfig {
    pub fn id(&self) -> &str {
        match self {
            SourceConfig::RestApi(c) => &c.id,
            SourceConfig::Html(c) => &c.id,
            SourceConfig::Channel(c) => &c.id,
        }
    }

    pub fn http(&self) -> &HttpSettings {
        match self {
            SourceConfig::RestApi(c) => &c.http,
            SourceConfig::Html(c) => &c.http,
            SourceConfig::Channel(c) => &c.http,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestApiSourceConfig {
    pub id: String,
    #[serde(flatten)]
    pub http: HttpSettings,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Extra query parameters sent with every listing request.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HtmlSourceConfig {
    pub id: String,
    #[serde(flatten)]
    pub http: HttpSettings,
    /// Listing path relative to `base_url`; `{page}` is replaced by the page number.
    #[serde(default = "default_list_path")]
    pub list_path: String,
    #[serde(default = "default_card_selector")]
    pub card_selector: String,
    #[serde(default = "default_link_selector")]
    pub link_selector: String,
    /// Path prefix identifying detail links for the fallback extraction.
    #[serde(default = "default_detail_path_prefix")]
    pub detail_path_prefix: String,
    #[serde(default)]
    pub selectors: DetailSelectors,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailSelectors {
    #[serde(default = "default_title_selector")]
    pub title: String,
    #[serde(default = "default_company_selector")]
    pub company: String,
    #[serde(default = "default_location_selector")]
    pub location: String,
    #[serde(default = "default_skills_selector")]
    pub skills: String,
    #[serde(default = "default_salary_selector")]
    pub salary: String,
    #[serde(default = "default_published_selector")]
    pub published: String,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        Self {
            title: default_title_selector(),
            company: default_company_selector(),
            location: default_location_selector(),
            skills: default_skills_selector(),
            salary: default_salary_selector(),
            published: default_published_selector(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelSourceConfig {
    pub id: String,
    #[serde(flatten)]
    pub http: HttpSettings,
    pub channels: Vec<String>,
}

/// Per-job settings: trigger, retry budget, and crawl limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    pub id: String,
    pub name: String,
    pub schedule: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub timezone: Option<String>,
    pub source: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_min_new_items")]
    pub min_new_items: usize,
    #[serde(default = "default_max_existing_ratio")]
    pub max_existing_ratio: f64,
    #[serde(default = "default_enabled")]
    pub fetch_details: bool,
}

impl JobConfig {
    pub fn to_new_job(&self) -> NewScheduledJob {
        NewScheduledJob {
            id: self.id.clone(),
            name: self.name.clone(),
            schedule: self.schedule.clone(),
            enabled: self.enabled,
            timezone: self.timezone.clone(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8390
}

fn default_broadcast_capacity() -> usize {
    1024
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_transport_retries() -> u32 {
    2
}

fn default_transport_retry_delay_ms() -> u64 {
    500
}

fn default_user_agent() -> String {
    concat!("vacancy-ingest/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_per_page() -> u32 {
    50
}

fn default_list_path() -> String {
    "/vacancies?page={page}".to_string()
}

fn default_card_selector() -> String {
    ".vacancy-card".to_string()
}

fn default_link_selector() -> String {
    "a.vacancy-card__title-link".to_string()
}

fn default_detail_path_prefix() -> String {
    "/vacancies/".to_string()
}

fn default_title_selector() -> String {
    "h1".to_string()
}

fn default_company_selector() -> String {
    ".company-name".to_string()
}

fn default_location_selector() -> String {
    ".vacancy-location".to_string()
}

fn default_skills_selector() -> String {
    ".skills .skill".to_string()
}

fn default_salary_selector() -> String {
    ".salary".to_string()
}

fn default_published_selector() -> String {
    "time[datetime]".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_max_pages() -> u32 {
    20
}

fn default_min_new_items() -> usize {
    1
}

fn default_max_existing_ratio() -> f64 {
    1.0
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            store: StoreKind::default(),
            broadcast_capacity: default_broadcast_capacity(),
            health_check_interval_secs: default_health_check_interval_secs(),
            sources: Vec::new(),
            jobs: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id() == id)
    }

    pub fn job(&self, id: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let mut source_ids = HashSet::new();
        for source in &self.sources {
            if source.id().trim().is_empty() {
                errors.push("Source id cannot be empty");
            } else if !source_ids.insert(source.id()) {
                errors.push(format!("Duplicate source id '{}'", source.id()));
            }
            if url::Url::parse(&source.http().base_url).is_err() {
                errors.push(format!(
                    "Source '{}' has an invalid base_url '{}'",
                    source.id(),
                    source.http().base_url
                ));
            }
            if let SourceConfig::Channel(c) = source {
                if c.channels.is_empty() {
                    errors.push(format!("Channel source '{}' lists no channels", c.id));
                }
            }
        }

        let mut job_ids = HashSet::new();
        for job in &self.jobs {
            if !job_ids.insert(job.id.as_str()) {
                errors.push(format!("Duplicate job id '{}'", job.id));
            }
            if let Err(job_errors) = validate_new_job(&job.to_new_job()) {
                for message in job_errors.0 {
                    errors.push(format!("Job '{}': {}", job.id, message));
                }
            }
            if self.source(&job.source).is_none() {
                errors.push(format!(
                    "Job '{}' references unknown source '{}'",
                    job.id, job.source
                ));
            }
            if !(0.0..=1.0).contains(&job.max_existing_ratio) {
                errors.push(format!(
                    "Job '{}': max_existing_ratio must be within [0, 1]",
                    job.id
                ));
            }
            if job.max_pages == 0 {
                errors.push(format!("Job '{}': max_pages must be at least 1", job.id));
            }
        }

        errors.into_result()
    }
}
