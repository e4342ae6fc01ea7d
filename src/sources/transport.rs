use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

use crate::ingest::retry::{retry_async, RetryPolicy};
use crate::models::config::HttpSettings;
use crate::sources::FetchError;

/// Fetch-with-timeout-and-retry: returns the response body or a typed error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_text(&self, url: &Url) -> Result<String, FetchError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            retry: RetryPolicy::new(
                settings.max_retries,
                Duration::from_millis(settings.retry_delay_ms),
            ),
        })
    }

    async fn get_once(&self, url: &Url) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }
}

fn classify(url: &Url, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_decode() {
        FetchError::decode(url.as_str(), err)
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        tracing::debug!("GET {}", url);
        let label = format!("GET {}", url);
        retry_async(self.retry, &label, FetchError::is_transient, || {
            self.get_once(url)
        })
        .await
    }
}
