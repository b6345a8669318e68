//! Core data models shared by ingestion, extraction, enrichment and retrieval.
//!
//! | Type | Lifecycle |
//! |------|-----------|
//! | [`Source`] | Created by configuration, deleted explicitly (cascades) |
//! | [`FeedEntry`] | Parsed from a feed document, never persisted directly |
//! | [`RawEntry`] | Inserted once per dedup key, immutable afterwards |
//! | [`ContentRecord`] | Created once per raw entry, mutated by crawl + AI |
//!
//! Timestamps are Unix seconds (`i64`) at rest and ISO 8601 at the edges.

use serde::{Deserialize, Serialize};

/// An origin feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: i64,
    /// Stable key, e.g. `"hn-front"`.
    pub key: String,
    pub name: String,
    pub url: String,
    pub category: Option<String>,
    pub enabled: bool,
    /// `None` means shared / global.
    pub owner: Option<String>,
    pub last_fetched_at: Option<i64>,
}

/// Fields needed to register a new source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub key: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

/// One item as parsed from a feed, before dedup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedEntry {
    /// `guid` (RSS) or `id` (Atom).
    pub external_id: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    /// Feed-supplied body (HTML or text).
    pub body: Option<String>,
    pub categories: Vec<String>,
}

/// A persisted feed item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntry {
    pub id: i64,
    pub source_id: i64,
    pub external_id: Option<String>,
    pub canonical_url: String,
    pub title: String,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    pub payload: String,
    pub payload_hash: String,
    pub created_at: i64,
}

/// Sentiment label assigned by the summary model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    /// Lenient parse: accepts common synonyms, anything unknown is neutral.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "positive" | "pos" | "good" | "bullish" => Sentiment::Positive,
            "negative" | "neg" | "bad" | "bearish" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

/// Crawl lifecycle of a content record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Pending,
    Ok,
    /// Page loaded but had no usable article. Terminal.
    TooShort,
    /// URL could not be parsed. Terminal.
    InvalidUrl,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Pending => "pending",
            CrawlStatus::Ok => "ok",
            CrawlStatus::TooShort => "too_short",
            CrawlStatus::InvalidUrl => "invalid_url",
            CrawlStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => CrawlStatus::Ok,
            "too_short" => CrawlStatus::TooShort,
            "invalid_url" => CrawlStatus::InvalidUrl,
            "failed" => CrawlStatus::Failed,
            _ => CrawlStatus::Pending,
        }
    }
}

/// The enrichable unit shown to search and read surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: i64,
    pub raw_entry_id: Option<i64>,
    pub source_id: Option<i64>,
    pub source_name: Option<String>,
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub content: Option<String>,
    pub category: Option<String>,
    pub ai_category: Option<String>,
    pub ai_summary: Option<String>,
    pub ai_processed: bool,
    pub sentiment: Option<Sentiment>,
    /// 1..=10, higher is more important.
    pub importance: Option<i64>,
    pub highlight: bool,
    pub tags: Vec<String>,
    pub published_at: Option<i64>,
    pub crawled_at: Option<i64>,
    pub crawl_status: CrawlStatus,
    pub updated_at: i64,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl ContentRecord {
    /// Build a fresh record from a raw entry, before any crawl or AI pass.
    pub fn from_entry(source: &Source, raw_entry_id: i64, entry: &FeedEntry, url: &str, now: i64) -> Self {
        let body = entry.body.clone().filter(|b| !b.trim().is_empty());
        Self {
            id: 0,
            raw_entry_id: Some(raw_entry_id),
            source_id: Some(source.id),
            source_name: Some(source.name.clone()),
            title: entry.title.clone().unwrap_or_default(),
            url: url.to_string(),
            snippet: body.as_deref().map(make_snippet).unwrap_or_default(),
            content: body,
            category: source.category.clone(),
            ai_category: None,
            ai_summary: None,
            ai_processed: false,
            sentiment: None,
            importance: None,
            highlight: false,
            tags: entry.categories.clone(),
            published_at: entry.published_at.or(Some(now)),
            crawled_at: None,
            crawl_status: CrawlStatus::Pending,
            updated_at: now,
            embedding: None,
        }
    }
}

/// AI-derived fields written by the enrichment pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Enrichment {
    pub summary: String,
    pub sentiment: Sentiment,
    pub importance: i64,
    pub highlight: bool,
    pub category: Option<String>,
}

/// Result of a successful extraction, as persisted on the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedArticle {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub published_at: Option<i64>,
}

/// Filters shared by every retrieval path and by filtered statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentFilter {
    /// Source key.
    pub source: Option<String>,
    pub category: Option<String>,
    pub ai_category: Option<String>,
    /// Only records bookmarked by the viewer. No viewer means no rows.
    #[serde(default)]
    pub bookmarked_only: bool,
    /// Case-insensitive containment on title or snippet.
    pub text: Option<String>,
    pub published_after: Option<i64>,
}

impl ContentFilter {
    /// In-process evaluation of the filter, used by non-SQL stores.
    pub fn matches(&self, record: &ContentRecord, source_key: Option<&str>, bookmarked: bool) -> bool {
        if let Some(ref s) = self.source {
            if source_key != Some(s.as_str()) {
                return false;
            }
        }
        if let Some(ref c) = self.category {
            if record.category.as_deref() != Some(c.as_str()) {
                return false;
            }
        }
        if let Some(ref c) = self.ai_category {
            if record.ai_category.as_deref() != Some(c.as_str()) {
                return false;
            }
        }
        if self.bookmarked_only && !bookmarked {
            return false;
        }
        if let Some(ref t) = self.text {
            let needle = t.to_lowercase();
            if !needle.is_empty()
                && !record.title.to_lowercase().contains(&needle)
                && !record.snippet.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(after) = self.published_after {
            if record.published_at.map(|p| p < after).unwrap_or(true) {
                return false;
            }
        }
        true
    }
}

/// Plain-text excerpt: tags removed, whitespace collapsed, 200 chars max.
pub fn make_snippet(body: &str) -> String {
    let mut text = String::with_capacity(body.len().min(1024));
    let mut in_tag = false;
    for c in body.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(200).collect()
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_snippet_strips_tags_and_collapses() {
        let s = make_snippet("<p>Hello\n\n  <b>world</b></p>");
        assert_eq!(s, "Hello world");
    }

    #[test]
    fn test_make_snippet_truncates() {
        let body = "x".repeat(500);
        assert_eq!(make_snippet(&body).chars().count(), 200);
    }

    #[test]
    fn test_sentiment_lenient() {
        assert_eq!(Sentiment::parse_lenient(" Positive "), Sentiment::Positive);
        assert_eq!(Sentiment::parse_lenient("NEGATIVE"), Sentiment::Negative);
        assert_eq!(Sentiment::parse_lenient("mixed"), Sentiment::Neutral);
    }

    #[test]
    fn test_filter_text_matches_title_or_snippet() {
        let mut r = sample();
        r.title = "AI breakthrough".into();
        let f = ContentFilter {
            text: Some("ai".into()),
            ..Default::default()
        };
        assert!(f.matches(&r, Some("a"), false));
        r.title = "Weather".into();
        assert!(!f.matches(&r, Some("a"), false));
    }

    #[test]
    fn test_filter_bookmarked_only() {
        let f = ContentFilter {
            bookmarked_only: true,
            ..Default::default()
        };
        assert!(!f.matches(&sample(), None, false));
        assert!(f.matches(&sample(), None, true));
    }

    fn sample() -> ContentRecord {
        let src = Source {
            id: 1,
            key: "a".into(),
            name: "A".into(),
            url: "https://a.example/feed".into(),
            category: Some("tech".into()),
            enabled: true,
            owner: None,
            last_fetched_at: None,
        };
        ContentRecord::from_entry(&src, 1, &FeedEntry::default(), "https://a.example/1", 100)
    }
}
