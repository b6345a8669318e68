//! Storage abstraction for Newsroom content.
//!
//! The [`Store`] trait covers everything the ingestion, extraction,
//! enrichment and retrieval pipelines do to sources' content. Settings,
//! scheduled tasks and model configuration are plain configuration records
//! and stay in the app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::dedup::EntryIdentity;
use crate::embedding::QueryVectors;
use crate::models::{ContentFilter, ContentRecord, CrawlStatus, Enrichment, ExtractedArticle, FeedEntry, Source};

/// Outcome of inserting one feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new raw entry and its content record were created.
    Inserted { raw_entry_id: i64, content_id: i64 },
    /// The dedup key already existed. Not an error.
    Duplicate,
}

/// A content record as seen by a particular viewer, with its vector score.
#[derive(Debug, Clone, Serialize)]
pub struct RecordHit {
    #[serde(flatten)]
    pub record: ContentRecord,
    /// Source key of the record, if it came from a feed.
    pub source_key: Option<String>,
    pub bookmarked: bool,
    /// Hybrid cosine similarity, set only by [`Store::vector_search`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// Number of records per source.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceCount {
    pub source: String,
    pub name: String,
    pub count: i64,
}

/// Corpus statistics returned next to every result page.
///
/// `global_total` and `per_source` ignore filters; every other count is
/// computed over the filtered set.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CorpusStats {
    pub global_total: i64,
    pub filtered_total: i64,
    pub ai_processed: i64,
    pub highlighted: i64,
    pub bookmarked: i64,
    pub per_source: Vec<SourceCount>,
}

/// One append-only enrichment audit row.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentLogEntry {
    pub content_id: i64,
    pub provider: String,
    pub model: String,
    pub output: String,
    /// `"success"` or `"error"`.
    pub status: String,
}

/// Rows removed by a source deletion.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DeletedCounts {
    pub content_records: i64,
    pub raw_entries: i64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_entry`](Store::insert_entry) | Insert-or-ignore a raw entry and create its content record |
/// | [`mark_source_fetched`](Store::mark_source_fetched) | Record a successful fetch |
/// | [`delete_source`](Store::delete_source) | Remove a source and everything derived from it |
/// | [`get_record`](Store::get_record) | Load one content record |
/// | [`save_extraction`](Store::save_extraction) / [`mark_crawl`](Store::mark_crawl) | Crawl results |
/// | [`save_enrichment`](Store::save_enrichment) / [`set_embedding`](Store::set_embedding) | AI results |
/// | [`scan`](Store::scan) / [`vector_search`](Store::vector_search) / [`stats`](Store::stats) | Retrieval |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a raw entry keyed by `identity`; when new, create exactly one
    /// linked content record in the same unit of work.
    async fn insert_entry(
        &self,
        source: &Source,
        entry: &FeedEntry,
        identity: &EntryIdentity,
        payload: &str,
        now: i64,
    ) -> Result<IngestOutcome>;

    async fn mark_source_fetched(&self, source_id: i64, at: i64) -> Result<()>;

    /// Delete content records of the source explicitly, then the source
    /// (raw entries cascade).
    async fn delete_source(&self, source_id: i64) -> Result<DeletedCounts>;

    async fn get_record(&self, id: i64) -> Result<Option<ContentRecord>>;

    async fn save_extraction(&self, id: i64, article: &ExtractedArticle, now: i64) -> Result<()>;

    /// Record a failed crawl; bumps the attempt counter.
    async fn mark_crawl(&self, id: i64, status: CrawlStatus, now: i64) -> Result<()>;

    /// Records whose crawl is pending, or failed fewer than `max_attempts` times.
    async fn crawl_backlog(&self, limit: i64, max_attempts: i64) -> Result<Vec<ContentRecord>>;

    async fn save_enrichment(&self, id: i64, enrichment: &Enrichment, now: i64) -> Result<()>;

    /// Record a failed summary pass; bumps the enrichment attempt counter.
    async fn mark_enrich_failed(&self, id: i64, now: i64) -> Result<()>;

    /// Records not yet AI-processed that failed fewer than `max_attempts`
    /// times, newest first.
    async fn enrichment_backlog(&self, limit: i64, max_attempts: i64) -> Result<Vec<ContentRecord>>;

    async fn set_embedding(&self, id: i64, vector: &[f32], model: &str) -> Result<()>;

    /// AI-processed records with no embedding yet, newest first.
    async fn embedding_backlog(&self, limit: i64) -> Result<Vec<ContentRecord>>;

    async fn save_translation(&self, id: i64, language: &str, data: &serde_json::Value) -> Result<()>;

    async fn append_enrichment_log(&self, entry: &EnrichmentLogEntry) -> Result<()>;

    /// Filtered scan ordered by publish time desc, importance desc.
    async fn scan(
        &self,
        filter: &ContentFilter,
        viewer: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RecordHit>>;

    /// Embedded records matching `filter`, scored with [`QueryVectors::score`],
    /// best first, at most `limit`.
    async fn vector_search(
        &self,
        query: &QueryVectors,
        filter: &ContentFilter,
        viewer: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecordHit>>;

    async fn stats(&self, filter: &ContentFilter, viewer: Option<&str>) -> Result<CorpusStats>;

    /// Top records by importance desc, publish time desc.
    async fn trending(&self, limit: i64) -> Result<Vec<ContentRecord>>;
}
