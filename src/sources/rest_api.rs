use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::models::config::RestApiSourceConfig;
use crate::models::{ApiVacancy, PageSelector, RawDetailResult, RawListResult, RawSourceItem, RawVacancy};
use crate::sources::{FetchError, SourceAdapter, Transport};

/// One page of the vacancy search endpoint.
#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    items: Vec<ApiVacancy>,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    pages: u32,
}

/// JSON REST job board with zero-based page numbers.
pub struct RestApiAdapter {
    config: RestApiSourceConfig,
    base: Url,
    transport: Arc<dyn Transport>,
}

impl RestApiAdapter {
    pub fn new(config: RestApiSourceConfig, transport: Arc<dyn Transport>) -> Result<Self, FetchError> {
        let base = Url::parse(config.http.base_url.trim_end_matches('/'))
            .map_err(|e| FetchError::invalid_url(&config.http.base_url, e))?;
        Ok(Self {
            config,
            base,
            transport,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::invalid_url(self.base.as_str(), "cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn listing_url(&self, page: u32) -> Result<Url, FetchError> {
        let mut url = self.endpoint(&["vacancies"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &page.to_string());
            query.append_pair("per_page", &self.config.per_page.to_string());
            for (key, value) in &self.config.query {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for RestApiAdapter {
    fn source_id(&self) -> &str {
        &self.config.id
    }

    fn first_page(&self) -> PageSelector {
        PageSelector::Number(0)
    }

    async fn fetch_list_page(&self, selector: &PageSelector) -> Result<RawListResult, FetchError> {
        let page = match selector {
            PageSelector::Number(n) => *n,
            PageSelector::Cursor(_) => {
                return Err(FetchError::invalid_url(
                    self.base.as_str(),
                    "REST API sources page by number",
                ))
            }
        };

        let url = self.listing_url(page)?;
        let body = self.transport.get_text(&url).await?;
        let listing: ListingResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::decode(url.as_str(), e))?;

        let next = if listing.page + 1 < listing.pages {
            Some(PageSelector::Number(listing.page + 1))
        } else {
            None
        };

        tracing::debug!(
            "{}: page {} of {} returned {} items",
            self.config.id,
            listing.page,
            listing.pages,
            listing.items.len()
        );

        Ok(RawListResult {
            items: listing.items.into_iter().map(RawSourceItem::RestApi).collect(),
            next,
        })
    }

    async fn fetch_detail_page(&self, item: &RawSourceItem) -> Result<RawDetailResult, FetchError> {
        let summary = match item {
            RawSourceItem::RestApi(v) => v,
            other => {
                return Err(FetchError::decode(
                    self.base.as_str(),
                    format!("unexpected item for REST API source: {}", other.external_id()),
                ))
            }
        };

        let url = self.endpoint(&["vacancies", &summary.id])?;
        let body = self.transport.get_text(&url).await?;
        let mut detail: ApiVacancy =
            serde_json::from_str(&body).map_err(|e| FetchError::decode(url.as_str(), e))?;

        if detail.alternate_url.is_none() {
            detail.alternate_url = summary.alternate_url.clone();
        }
        if detail.published_at.is_none() {
            detail.published_at = summary.published_at.clone();
        }

        Ok(RawVacancy::RestApi(detail))
    }
}
