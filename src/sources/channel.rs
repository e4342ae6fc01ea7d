use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::models::{
    ChannelMessage, PageSelector, RawDetailResult, RawListResult, RawSourceItem, RawVacancy,
};
use crate::sources::{FetchError, SourceAdapter, Transport};

/// Public web preview of one messaging channel. Pages are addressed by a
/// `before` message-id cursor; the first page has none.
pub struct ChannelAdapter {
    source_id: String,
    channel: String,
    base: Url,
    message: Selector,
    text: Selector,
    time: Selector,
    transport: Arc<dyn Transport>,
}

fn selector(raw: &str) -> Result<Selector, FetchError> {
    Selector::parse(raw).map_err(|e| FetchError::InvalidSelector {
        selector: raw.to_string(),
        message: e.to_string(),
    })
}

/// Message text with `<br>` turned into newlines.
fn message_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) if e.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

impl ChannelAdapter {
    pub fn new(
        source_id: &str,
        base_url: &str,
        channel: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, FetchError> {
        let base = Url::parse(base_url).map_err(|e| FetchError::invalid_url(base_url, e))?;
        if base.cannot_be_a_base() {
            return Err(FetchError::invalid_url(base_url, "cannot be a base"));
        }
        Ok(Self {
            source_id: source_id.to_string(),
            channel: channel.trim_start_matches('@').to_string(),
            base,
            message: selector("[data-post]")?,
            text: selector(".tgme_widget_message_text")?,
            time: selector("time[datetime]")?,
            transport,
        })
    }

    fn with_segments(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn page_url(&self, before: Option<&str>) -> Url {
        let mut url = self.with_segments(&["s", &self.channel]);
        if let Some(before) = before {
            url.query_pairs_mut().append_pair("before", before);
        }
        url
    }

    /// Text messages on the page, plus the oldest post id seen including
    /// the skipped ones.
    fn parse_messages(&self, body: &str) -> (Vec<ChannelMessage>, Option<u64>) {
        let document = Html::parse_document(body);
        let mut messages = Vec::new();
        let mut oldest: Option<u64> = None;

        for el in document.select(&self.message) {
            let Some(post) = el.value().attr("data-post") else {
                continue;
            };
            let Some(message_id) = post
                .rsplit('/')
                .next()
                .and_then(|id| id.parse::<u64>().ok())
            else {
                tracing::debug!("{}: skipping message with post id '{}'", self.channel, post);
                continue;
            };
            oldest = Some(oldest.map_or(message_id, |o| o.min(message_id)));

            // Service messages (joins, pins) carry no text.
            let Some(text) = el
                .select(&self.text)
                .next()
                .map(message_text)
                .filter(|t| !t.is_empty())
            else {
                continue;
            };

            let published_at = el
                .select(&self.time)
                .next()
                .and_then(|t| t.value().attr("datetime"))
                .map(str::to_string);

            let url = self.with_segments(&[&self.channel, &message_id.to_string()]);

            messages.push(ChannelMessage {
                channel: self.channel.clone(),
                message_id,
                text,
                published_at,
                url: url.to_string(),
            });
        }

        (messages, oldest)
    }
}

#[async_trait]
impl SourceAdapter for ChannelAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn first_page(&self) -> PageSelector {
        PageSelector::Cursor(None)
    }

    async fn fetch_list_page(&self, selector: &PageSelector) -> Result<RawListResult, FetchError> {
        let before = match selector {
            PageSelector::Cursor(cursor) => cursor.as_deref(),
            PageSelector::Number(_) => {
                return Err(FetchError::invalid_url(
                    self.base.as_str(),
                    "channel sources page by message cursor",
                ))
            }
        };

        let url = self.page_url(before);
        let body = self.transport.get_text(&url).await?;
        let (mut messages, oldest) = self.parse_messages(&body);

        // The preview lists oldest first.
        messages.sort_by(|a, b| b.message_id.cmp(&a.message_id));
        messages.dedup_by_key(|m| m.message_id);

        let next = oldest
            .filter(|oldest| *oldest > 1)
            .map(|oldest| PageSelector::Cursor(Some(oldest.to_string())));

        tracing::debug!(
            "{}/{}: fetched {} messages before {:?}",
            self.source_id,
            self.channel,
            messages.len(),
            before
        );

        Ok(RawListResult {
            items: messages.into_iter().map(RawSourceItem::Channel).collect(),
            next,
        })
    }

    async fn fetch_detail_page(&self, item: &RawSourceItem) -> Result<RawDetailResult, FetchError> {
        match item {
            RawSourceItem::Channel(message) => Ok(RawVacancy::Channel(message.clone())),
            other => Err(FetchError::decode(
                self.base.as_str(),
                format!("unexpected item for channel source: {}", other.external_id()),
            )),
        }
    }
}
