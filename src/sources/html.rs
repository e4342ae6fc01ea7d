use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::models::config::HtmlSourceConfig;
use crate::models::{
    HtmlListItem, HtmlVacancy, PageSelector, RawDetailResult, RawListResult, RawSourceItem,
    RawVacancy,
};
use crate::sources::{FetchError, SourceAdapter, Transport};

struct DetailSelectorSet {
    title: Selector,
    company: Selector,
    location: Selector,
    skills: Selector,
    salary: Selector,
    published: Selector,
}

/// Server-rendered job board scraped with CSS selectors. Pages start at 1.
pub struct HtmlAdapter {
    config: HtmlSourceConfig,
    base: Url,
    card: Selector,
    link: Selector,
    any_link: Selector,
    detail: DetailSelectorSet,
    transport: Arc<dyn Transport>,
}

fn parse_selector(raw: &str) -> Result<Selector, FetchError> {
    Selector::parse(raw).map_err(|e| FetchError::InvalidSelector {
        selector: raw.to_string(),
        message: e.to_string(),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(element_text)
        .find(|t| !t.is_empty())
}

impl HtmlAdapter {
    pub fn new(config: HtmlSourceConfig, transport: Arc<dyn Transport>) -> Result<Self, FetchError> {
        let base = Url::parse(&config.http.base_url)
            .map_err(|e| FetchError::invalid_url(&config.http.base_url, e))?;
        let s = &config.selectors;
        let detail = DetailSelectorSet {
            title: parse_selector(&s.title)?,
            company: parse_selector(&s.company)?,
            location: parse_selector(&s.location)?,
            skills: parse_selector(&s.skills)?,
            salary: parse_selector(&s.salary)?,
            published: parse_selector(&s.published)?,
        };
        Ok(Self {
            card: parse_selector(&config.card_selector)?,
            link: parse_selector(&config.link_selector)?,
            any_link: parse_selector("a[href]")?,
            detail,
            base,
            config,
            transport,
        })
    }

    fn listing_url(&self, page: u32) -> Result<Url, FetchError> {
        let path = self.config.list_path.replace("{page}", &page.to_string());
        self.base
            .join(&path)
            .map_err(|e| FetchError::invalid_url(path.clone(), e))
    }

    /// Slug of a detail URL: the first path segment after the detail prefix.
    fn detail_slug(&self, url: &Url) -> Option<String> {
        let rest = url.path().strip_prefix(&self.config.detail_path_prefix)?;
        let slug = rest.split('/').next()?;
        if slug.is_empty() {
            None
        } else {
            Some(slug.to_string())
        }
    }

    fn list_item(&self, href: &str, title: Option<String>) -> Option<HtmlListItem> {
        let mut url = self.base.join(href).ok()?;
        url.set_fragment(None);
        let slug = self.detail_slug(&url)?;
        Some(HtmlListItem {
            url: url.to_string(),
            slug,
            title: title.filter(|t| !t.is_empty()),
        })
    }

    /// Links from listing cards; falls back to every detail-looking anchor on
    /// the page when the card markup yields nothing.
    fn extract_items(&self, document: &Html) -> Vec<HtmlListItem> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for card in document.select(&self.card) {
            for link in card.select(&self.link) {
                let Some(href) = link.value().attr("href") else {
                    continue;
                };
                if let Some(item) = self.list_item(href, Some(element_text(link))) {
                    if seen.insert(item.url.clone()) {
                        items.push(item);
                    }
                }
            }
        }

        if !items.is_empty() {
            return items;
        }

        tracing::debug!(
            "{}: card selector matched no links, falling back to anchor scan",
            self.config.id
        );

        for link in document.select(&self.any_link) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if let Some(item) = self.list_item(href, Some(element_text(link))) {
                if seen.insert(item.url.clone()) {
                    items.push(item);
                }
            }
        }

        items
    }

    fn extract_detail(&self, item: &HtmlListItem, body: &str) -> HtmlVacancy {
        let document = Html::parse_document(body);
        let d = &self.detail;

        let mut skills = Vec::new();
        for el in document.select(&d.skills) {
            let text = element_text(el);
            if !text.is_empty() {
                skills.push(text);
            }
        }

        let published_at = document.select(&d.published).find_map(|el| {
            el.value()
                .attr("datetime")
                .map(str::to_string)
                .or_else(|| Some(element_text(el)).filter(|t| !t.is_empty()))
        });

        HtmlVacancy {
            url: item.url.clone(),
            slug: item.slug.clone(),
            title: first_text(&document, &d.title).or_else(|| item.title.clone()),
            company: first_text(&document, &d.company),
            location: first_text(&document, &d.location),
            skills,
            salary_text: first_text(&document, &d.salary),
            published_at,
        }
    }
}

#[async_trait]
impl SourceAdapter for HtmlAdapter {
    fn source_id(&self) -> &str {
        &self.config.id
    }

    fn first_page(&self) -> PageSelector {
        PageSelector::Number(1)
    }

    async fn fetch_list_page(&self, selector: &PageSelector) -> Result<RawListResult, FetchError> {
        let page = match selector {
            PageSelector::Number(n) => *n,
            PageSelector::Cursor(_) => {
                return Err(FetchError::invalid_url(
                    self.base.as_str(),
                    "HTML sources page by number",
                ))
            }
        };

        let url = self.listing_url(page)?;
        let body = self.transport.get_text(&url).await?;
        let items = {
            let document = Html::parse_document(&body);
            self.extract_items(&document)
        };

        tracing::debug!("{}: page {} yielded {} links", self.config.id, page, items.len());

        let next = if items.is_empty() {
            None
        } else {
            Some(PageSelector::Number(page + 1))
        };

        Ok(RawListResult {
            items: items.into_iter().map(RawSourceItem::Html).collect(),
            next,
        })
    }

    async fn fetch_detail_page(&self, item: &RawSourceItem) -> Result<RawDetailResult, FetchError> {
        let listed = match item {
            RawSourceItem::Html(listed) => listed,
            other => {
                return Err(FetchError::decode(
                    self.base.as_str(),
                    format!("unexpected item for HTML source: {}", other.external_id()),
                ))
            }
        };

        let url = Url::parse(&listed.url).map_err(|e| FetchError::invalid_url(&listed.url, e))?;
        let body = self.transport.get_text(&url).await?;
        Ok(RawVacancy::Html(self.extract_detail(listed, &body)))
    }
}
