//! Feed fetching and parsing (RSS 0.9x/1.0/2.0 via `rss`, Atom via
//! `atom_syndication`). Per entry:
//!
//! | Field | RSS | Atom |
//! |-------|-----|------|
//! | external id | `guid` | `id` |
//! | link | `link` text | `link[href]`, `rel="alternate"` preferred |
//! | published | `pubDate`, `dc:date` | `published`, `updated` |
//! | body | `content:encoded`, `description` | `content`, `summary` |
//! | author | `dc:creator`, `author` | `author/name` |
//! | categories | `category` text | `category[term]` |
//!
//! A document neither crate accepts is rejected as not-a-feed.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

use newsroom_core::models::FeedEntry;

use crate::transport::Transport;

/// A parsed feed document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn decode_title(s: &str) -> Option<String> {
    non_empty(&html_escape::decode_html_entities(s))
}

/// RFC 2822 (RSS) or RFC 3339 (Atom) to Unix seconds.
pub fn parse_date(s: &str) -> Option<i64> {
    let s = s.trim();
    chrono::DateTime::parse_from_rfc2822(s)
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.timestamp())
        .ok()
}

fn rss_entry(item: &rss::Item) -> FeedEntry {
    let dc = item.dublin_core_ext();
    let author = dc
        .and_then(|dc| dc.creators().iter().find_map(|c| non_empty(c)))
        .or_else(|| item.author().and_then(non_empty));
    let published_at = item
        .pub_date()
        .and_then(parse_date)
        .or_else(|| dc.and_then(|dc| dc.dates().iter().find_map(|d| parse_date(d))));
    FeedEntry {
        external_id: item.guid().and_then(|g| non_empty(g.value())),
        link: item.link().and_then(non_empty),
        title: item.title().and_then(decode_title),
        author,
        published_at,
        body: item
            .content()
            .and_then(non_empty)
            .or_else(|| item.description().and_then(non_empty)),
        categories: item
            .categories()
            .iter()
            .filter_map(|c| non_empty(c.name()))
            .collect(),
    }
}

fn rss_feed(channel: &rss::Channel) -> ParsedFeed {
    ParsedFeed {
        title: non_empty(channel.title()),
        entries: channel.items().iter().map(rss_entry).collect(),
    }
}

fn atom_entry(entry: &atom_syndication::Entry) -> FeedEntry {
    let links = entry.links();
    let link = links
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| links.first())
        .and_then(|l| non_empty(l.href()));
    let published_at = Some(entry.published().unwrap_or(entry.updated()).timestamp());
    FeedEntry {
        external_id: non_empty(entry.id()),
        link,
        title: decode_title(entry.title().as_str()),
        author: entry.authors().iter().find_map(|a| non_empty(a.name())),
        published_at,
        body: entry
            .content()
            .and_then(|c| c.value())
            .and_then(non_empty)
            .or_else(|| entry.summary().and_then(|s| non_empty(s.as_str()))),
        categories: entry
            .categories()
            .iter()
            .filter_map(|c| non_empty(c.term()))
            .collect(),
    }
}

fn atom_feed(feed: &atom_syndication::Feed) -> ParsedFeed {
    ParsedFeed {
        title: non_empty(feed.title().as_str()),
        entries: feed.entries().iter().map(atom_entry).collect(),
    }
}

/// Parse a feed document. RSS is tried first, then Atom.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed> {
    let rss_err = match rss::Channel::read_from(xml.as_bytes()) {
        Ok(channel) => return Ok(rss_feed(&channel)),
        Err(e) => e,
    };
    match atom_syndication::Feed::read_from(xml.as_bytes()) {
        Ok(feed) => Ok(atom_feed(&feed)),
        Err(atom_err) => Err(anyhow!(
            "not an RSS or Atom document (rss: {}; atom: {})",
            rss_err,
            atom_err
        )),
    }
}

/// Cheap pre-check used before registering a source.
pub fn looks_like_feed(body: &str) -> bool {
    let head: String = body.chars().take(4096).collect::<String>().to_lowercase();
    head.contains("<rss") || head.contains("<feed") || head.contains("<channel") || head.contains("<rdf:rdf")
}

/// Result of probing a URL for a feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedCheck {
    pub url: String,
    pub valid: bool,
    pub title: Option<String>,
    pub entry_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetches feeds through the shared [`Transport`].
#[derive(Clone)]
pub struct FeedClient {
    transport: Transport,
    timeout: Duration,
}

impl FeedClient {
    pub fn new(transport: Transport, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let fetched = self.transport.get(url, self.timeout).await?;
        let body = String::from_utf8_lossy(&fetched.bytes);
        if !looks_like_feed(&body) {
            bail!("{} did not return an RSS or Atom document", url);
        }
        parse_feed(&body).with_context(|| format!("parsing feed {}", url))
    }

    pub async fn validate(&self, url: &str) -> Result<FeedCheck> {
        match self.fetch(url).await {
            Ok(feed) => Ok(FeedCheck {
                url: url.to_string(),
                valid: true,
                title: feed.title,
                entry_count: feed.entries.len(),
                error: None,
            }),
            Err(e) => {
                tracing::debug!(url, error = %e, "feed validation failed");
                Ok(FeedCheck {
                    url: url.to_string(),
                    valid: false,
                    title: None,
                    entry_count: 0,
                    error: Some(format!("{:#}", e)),
                })
            }
        }
    }
}
