//! Raw, source-specific structures produced by source adapters.
//!
//! Each variant carries only what its source actually provides. They are
//! turned into [`crate::models::CanonicalVacancyRecord`] by exactly one
//! transformer per variant in `ingest::normalize`.

use serde::{Deserialize, Serialize};

/// Position in a source's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PageSelector {
    /// Numbered pages (REST API from 0, HTML listings from 1).
    Number(u32),
    /// Cursor-based paging; `None` asks for the newest page.
    Cursor(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ApiNamed {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ApiSalary {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub currency: Option<String>,
}

/// Vacancy as returned by the REST API (listing entries omit skills and
/// description; the detail endpoint fills them in).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiVacancy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub alternate_url: Option<String>,
    #[serde(default)]
    pub employer: Option<ApiNamed>,
    #[serde(default)]
    pub area: Option<ApiNamed>,
    #[serde(default)]
    pub salary: Option<ApiSalary>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub key_skills: Vec<ApiNamed>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Link found on an HTML listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlListItem {
    pub url: String,
    /// Last path segment of the detail URL, used as the external id.
    pub slug: String,
    pub title: Option<String>,
}

/// Fields extracted from an HTML detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HtmlVacancy {
    pub url: String,
    pub slug: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub skills: Vec<String>,
    pub salary_text: Option<String>,
    pub published_at: Option<String>,
}

/// One message of a messaging channel, treated as one candidate posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub message_id: u64,
    pub text: String,
    pub published_at: Option<String>,
    pub url: String,
}

/// Listing entry returned by `SourceAdapter::fetch_list_page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSourceItem {
    RestApi(ApiVacancy),
    Html(HtmlListItem),
    Channel(ChannelMessage),
}

impl RawSourceItem {
    /// The per-source identifier used as the dedup key.
    pub fn external_id(&self) -> String {
        match self {
            RawSourceItem::RestApi(v) => v.id.clone(),
            RawSourceItem::Html(item) => item.slug.clone(),
            RawSourceItem::Channel(msg) => channel_external_id(&msg.channel, msg.message_id),
        }
    }

    /// Treat the listing entry as the full record, for jobs that skip detail fetches.
    pub fn into_vacancy(self) -> RawVacancy {
        match self {
            RawSourceItem::RestApi(v) => RawVacancy::RestApi(v),
            RawSourceItem::Html(item) => RawVacancy::Html(HtmlVacancy {
                url: item.url,
                slug: item.slug,
                title: item.title,
                ..HtmlVacancy::default()
            }),
            RawSourceItem::Channel(msg) => RawVacancy::Channel(msg),
        }
    }
}

/// Detail record returned by `SourceAdapter::fetch_detail_page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawVacancy {
    RestApi(ApiVacancy),
    Html(HtmlVacancy),
    Channel(ChannelMessage),
}

/// Detail records are the full raw vacancy.
pub type RawDetailResult = RawVacancy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawListResult {
    pub items: Vec<RawSourceItem>,
    /// Where the following page lives, if the source reports one.
    pub next: Option<PageSelector>,
}

pub fn channel_external_id(channel: &str, message_id: u64) -> String {
    format!("{}/{}", channel, message_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_vacancy_deserializes_listing_shape() {
        let json = r#"{
            "id": "101",
            "name": "Rust developer",
            "employer": {"name": "Acme"},
            "area": {"name": "Berlin"},
            "salary": {"from": 5000, "to": null, "currency": "EUR"},
            "published_at": "2025-06-15T10:00:00+0300"
        }"#;
        let vacancy: ApiVacancy = serde_json::from_str(json).expect("deserialize");
        assert_eq!(vacancy.id, "101");
        assert_eq!(vacancy.employer.unwrap().name, "Acme");
        assert!(vacancy.key_skills.is_empty());
        assert_eq!(vacancy.salary.unwrap().to, None);
    }

    #[test]
    fn test_external_id_per_variant() {
        let html = RawSourceItem::Html(HtmlListItem {
            url: "https://jobs.example/vacancies/1000123".to_string(),
            slug: "1000123".to_string(),
            title: None,
        });
        assert_eq!(html.external_id(), "1000123");

        let msg = RawSourceItem::Channel(ChannelMessage {
            channel: "rustjobs".to_string(),
            message_id: 42,
            text: "hi".to_string(),
            published_at: None,
            url: "https://t.me/rustjobs/42".to_string(),
        });
        assert_eq!(msg.external_id(), "rustjobs/42");
    }

    #[test]
    fn test_raw_source_item_is_tagged() {
        let item = RawSourceItem::Html(HtmlListItem {
            url: "u".to_string(),
            slug: "s".to_string(),
            title: None,
        });
        let json = serde_json::to_string(&item).expect("serialize");
        assert!(json.contains("\"kind\":\"html\""));
    }

    #[test]
    fn test_page_selector_serde() {
        let json = serde_json::to_string(&PageSelector::Number(3)).expect("serialize");
        assert_eq!(json, r#"{"type":"Number","value":3}"#);
        let cursor: PageSelector =
            serde_json::from_str(r#"{"type":"Cursor","value":null}"#).expect("deserialize");
        assert_eq!(cursor, PageSelector::Cursor(None));
    }
}
