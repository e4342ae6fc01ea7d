//! Source adapters: the per-vendor fetch layer.
//!
//! An adapter only knows how to page through one source and fetch a detail
//! record for an item it listed. It never deduplicates, persists, or applies
//! rules that span sources. Every network or parse failure is surfaced as a
//! [`FetchError`].

pub mod channel;
pub mod html;
pub mod rest_api;
pub mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{PageSelector, RawDetailResult, RawListResult, RawSourceItem, SourceConfig};

pub use transport::{HttpTransport, Transport};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Invalid CSS selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
}

impl FetchError {
    /// Errors worth repeating the same request for.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::InvalidUrl { .. }
            | FetchError::Decode { .. }
            | FetchError::InvalidSelector { .. } => false,
        }
    }

    /// The remote says the resource no longer exists.
    pub fn is_gone(&self) -> bool {
        matches!(self, FetchError::Status { status: 404 | 410, .. })
    }

    pub(crate) fn decode(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        FetchError::Decode {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid_url(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        FetchError::InvalidUrl {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Identifier stamped on every record from this adapter.
    fn source_id(&self) -> &str;

    /// Selector for the newest page.
    fn first_page(&self) -> PageSelector;

    async fn fetch_list_page(&self, selector: &PageSelector) -> Result<RawListResult, FetchError>;

    async fn fetch_detail_page(&self, item: &RawSourceItem)
        -> Result<RawDetailResult, FetchError>;
}

/// Build every adapter described by one source entry, sharing `transport`.
///
/// A channel source yields one adapter per configured channel handle.
pub fn build_adapters_with(
    source: &SourceConfig,
    transport: Arc<dyn Transport>,
) -> Result<Vec<Arc<dyn SourceAdapter>>, FetchError> {
    let adapters: Vec<Arc<dyn SourceAdapter>> = match source {
        SourceConfig::RestApi(cfg) => vec![Arc::new(rest_api::RestApiAdapter::new(
            cfg.clone(),
            transport,
        )?)],
        SourceConfig::Html(cfg) => {
            vec![Arc::new(html::HtmlAdapter::new(cfg.clone(), transport)?)]
        }
        SourceConfig::Channel(cfg) => {
            let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
            for handle in &cfg.channels {
                adapters.push(Arc::new(channel::ChannelAdapter::new(
                    &cfg.id,
                    &cfg.http.base_url,
                    handle,
                    transport.clone(),
                )?));
            }
            adapters
        }
    };
    Ok(adapters)
}

/// Build adapters backed by a real HTTP transport configured from the source.
pub fn build_adapters(source: &SourceConfig) -> anyhow::Result<Vec<Arc<dyn SourceAdapter>>> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(source.http())?);
    Ok(build_adapters_with(source, transport)?)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use url::Url;

    use super::{FetchError, Transport};

    /// Transport double serving canned bodies keyed by full URL.
    #[derive(Default)]
    pub struct FixtureTransport {
        bodies: Mutex<HashMap<String, Result<String, FetchError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl FixtureTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn serve(&self, url: &str, body: &str) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), Ok(body.to_string()));
        }

        pub fn fail(&self, url: &str, err: FetchError) {
            self.bodies.lock().unwrap().insert(url.to_string(), Err(err));
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FixtureTransport {
        async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            match self.bodies.lock().unwrap().get(url.as_str()) {
                Some(result) => result.clone(),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }
}
