//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Everything lives behind one `std::sync::RwLock`. Vector search is
//! brute-force over all embedded records; filters are evaluated with
//! [`ContentFilter::matches`].

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::dedup::{payload_hash, EntryIdentity};
use crate::embedding::QueryVectors;
use crate::models::{
    ContentFilter, ContentRecord, CrawlStatus, Enrichment, ExtractedArticle, FeedEntry, NewSource,
    RawEntry, Source,
};

use super::{
    CorpusStats, DeletedCounts, EnrichmentLogEntry, IngestOutcome, RecordHit, SourceCount, Store,
};

struct StoredRecord {
    record: ContentRecord,
    crawl_attempts: i64,
    enrich_attempts: i64,
    translation: Option<(String, serde_json::Value)>,
}

#[derive(Default)]
struct Inner {
    sources: Vec<Source>,
    raw_entries: Vec<RawEntry>,
    records: Vec<StoredRecord>,
    bookmarks: HashSet<(String, i64)>,
    log: Vec<EnrichmentLogEntry>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record_mut(&mut self, id: i64) -> Result<&mut StoredRecord> {
        self.records
            .iter_mut()
            .find(|r| r.record.id == id)
            .ok_or_else(|| anyhow!("content record {} not found", id))
    }

    fn source_key(&self, record: &ContentRecord) -> Option<String> {
        record
            .source_id
            .and_then(|sid| self.sources.iter().find(|s| s.id == sid))
            .map(|s| s.key.clone())
    }

    fn hit(&self, record: &ContentRecord, viewer: Option<&str>) -> RecordHit {
        RecordHit {
            record: record.clone(),
            source_key: self.source_key(record),
            bookmarked: self.is_bookmarked(viewer, record.id),
            similarity: None,
        }
    }

    fn is_bookmarked(&self, viewer: Option<&str>, id: i64) -> bool {
        viewer
            .map(|v| self.bookmarks.contains(&(v.to_string(), id)))
            .unwrap_or(false)
    }

    fn filtered<'a>(
        &'a self,
        filter: &'a ContentFilter,
        viewer: Option<&'a str>,
    ) -> impl Iterator<Item = &'a ContentRecord> + 'a {
        self.records.iter().map(|s| &s.record).filter(move |r| {
            let key = self.source_key(r);
            filter.matches(r, key.as_deref(), self.is_bookmarked(viewer, r.id))
        })
    }
}

/// In-memory store.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    pub fn add_source(&self, new: NewSource) -> Result<Source> {
        let mut inner = self.write()?;
        let source = Source {
            id: inner.next_id(),
            key: new.key,
            name: new.name,
            url: new.url,
            category: new.category,
            enabled: true,
            owner: new.owner,
            last_fetched_at: None,
        };
        inner.sources.push(source.clone());
        Ok(source)
    }

    pub fn source(&self, id: i64) -> Result<Option<Source>> {
        Ok(self.read()?.sources.iter().find(|s| s.id == id).cloned())
    }

    /// Insert a record that did not come from a feed (or a prepared one).
    pub fn insert_record(&self, mut record: ContentRecord) -> Result<i64> {
        let mut inner = self.write()?;
        record.id = inner.next_id();
        let id = record.id;
        inner.records.push(StoredRecord {
            record,
            crawl_attempts: 0,
            enrich_attempts: 0,
            translation: None,
        });
        Ok(id)
    }

    pub fn add_bookmark(&self, viewer: &str, content_id: i64) -> Result<()> {
        self.write()?.bookmarks.insert((viewer.to_string(), content_id));
        Ok(())
    }

    pub fn raw_entry_count(&self) -> Result<usize> {
        Ok(self.read()?.raw_entries.len())
    }

    pub fn record_count(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    pub fn log_entries(&self) -> Result<Vec<EnrichmentLogEntry>> {
        Ok(self.read()?.log.clone())
    }

    pub fn translation(&self, id: i64) -> Result<Option<(String, serde_json::Value)>> {
        Ok(self
            .read()?
            .records
            .iter()
            .find(|r| r.record.id == id)
            .and_then(|r| r.translation.clone()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(a: &ContentRecord, b: &ContentRecord) -> std::cmp::Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then(b.importance.cmp(&a.importance))
        .then(b.id.cmp(&a.id))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_entry(
        &self,
        source: &Source,
        entry: &FeedEntry,
        identity: &EntryIdentity,
        payload: &str,
        now: i64,
    ) -> Result<IngestOutcome> {
        let mut inner = self.write()?;
        let external_id = identity.external_id().map(String::from);
        let exists = inner.raw_entries.iter().any(|r| {
            r.source_id == source.id
                && match (&external_id, &r.external_id) {
                    (Some(a), Some(b)) => a == b,
                    (None, None) => r.canonical_url == identity.canonical_url,
                    _ => false,
                }
        });
        if exists {
            return Ok(IngestOutcome::Duplicate);
        }

        let raw_entry_id = inner.next_id();
        inner.raw_entries.push(RawEntry {
            id: raw_entry_id,
            source_id: source.id,
            external_id,
            canonical_url: identity.canonical_url.clone(),
            title: entry.title.clone().unwrap_or_default(),
            author: entry.author.clone(),
            published_at: entry.published_at,
            payload: payload.to_string(),
            payload_hash: payload_hash(payload),
            created_at: now,
        });

        if inner
            .records
            .iter()
            .any(|r| r.record.raw_entry_id == Some(raw_entry_id))
        {
            return Ok(IngestOutcome::Duplicate);
        }
        let mut record =
            ContentRecord::from_entry(source, raw_entry_id, entry, &identity.canonical_url, now);
        record.id = inner.next_id();
        let content_id = record.id;
        inner.records.push(StoredRecord {
            record,
            crawl_attempts: 0,
            enrich_attempts: 0,
            translation: None,
        });

        Ok(IngestOutcome::Inserted {
            raw_entry_id,
            content_id,
        })
    }

    async fn mark_source_fetched(&self, source_id: i64, at: i64) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(s) = inner.sources.iter_mut().find(|s| s.id == source_id) {
            s.last_fetched_at = Some(at);
        }
        Ok(())
    }

    async fn delete_source(&self, source_id: i64) -> Result<DeletedCounts> {
        let mut inner = self.write()?;
        let records_before = inner.records.len();
        inner
            .records
            .retain(|r| r.record.source_id != Some(source_id));
        let raw_before = inner.raw_entries.len();
        inner.raw_entries.retain(|r| r.source_id != source_id);
        inner.sources.retain(|s| s.id != source_id);
        Ok(DeletedCounts {
            content_records: (records_before - inner.records.len()) as i64,
            raw_entries: (raw_before - inner.raw_entries.len()) as i64,
        })
    }

    async fn get_record(&self, id: i64) -> Result<Option<ContentRecord>> {
        Ok(self
            .read()?
            .records
            .iter()
            .find(|r| r.record.id == id)
            .map(|r| r.record.clone()))
    }

    async fn save_extraction(&self, id: i64, article: &ExtractedArticle, now: i64) -> Result<()> {
        let mut inner = self.write()?;
        let stored = inner.record_mut(id)?;
        let r = &mut stored.record;
        if !article.title.is_empty() {
            r.title = article.title.clone();
        }
        r.content = Some(article.content.clone());
        r.snippet = article.excerpt.clone();
        if article.published_at.is_some() {
            r.published_at = article.published_at;
        }
        r.crawled_at = Some(now);
        r.crawl_status = CrawlStatus::Ok;
        r.updated_at = now;
        Ok(())
    }

    async fn mark_crawl(&self, id: i64, status: CrawlStatus, now: i64) -> Result<()> {
        let mut inner = self.write()?;
        let stored = inner.record_mut(id)?;
        stored.crawl_attempts += 1;
        stored.record.crawl_status = status;
        stored.record.updated_at = now;
        Ok(())
    }

    async fn crawl_backlog(&self, limit: i64, max_attempts: i64) -> Result<Vec<ContentRecord>> {
        let inner = self.read()?;
        let mut out: Vec<ContentRecord> = inner
            .records
            .iter()
            .filter(|s| {
                s.record.crawled_at.is_none()
                    && match s.record.crawl_status {
                        CrawlStatus::Pending => true,
                        CrawlStatus::Failed => s.crawl_attempts < max_attempts,
                        _ => false,
                    }
            })
            .map(|s| s.record.clone())
            .collect();
        out.sort_by(newest_first);
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn save_enrichment(&self, id: i64, e: &Enrichment, now: i64) -> Result<()> {
        let mut inner = self.write()?;
        let r = &mut inner.record_mut(id)?.record;
        r.ai_summary = Some(e.summary.clone());
        r.sentiment = Some(e.sentiment);
        r.importance = Some(e.importance);
        r.highlight = e.highlight;
        r.ai_category = e.category.clone();
        r.ai_processed = true;
        r.updated_at = now;
        Ok(())
    }

    async fn mark_enrich_failed(&self, id: i64, now: i64) -> Result<()> {
        let mut inner = self.write()?;
        let stored = inner.record_mut(id)?;
        stored.enrich_attempts += 1;
        stored.record.updated_at = now;
        Ok(())
    }

    async fn enrichment_backlog(&self, limit: i64, max_attempts: i64) -> Result<Vec<ContentRecord>> {
        let inner = self.read()?;
        let mut out: Vec<ContentRecord> = inner
            .records
            .iter()
            .filter(|s| !s.record.ai_processed && s.enrich_attempts < max_attempts)
            .map(|s| s.record.clone())
            .collect();
        out.sort_by(newest_first);
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn set_embedding(&self, id: i64, vector: &[f32], _model: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.record_mut(id)?.record.embedding = Some(vector.to_vec());
        Ok(())
    }

    async fn embedding_backlog(&self, limit: i64) -> Result<Vec<ContentRecord>> {
        let inner = self.read()?;
        let mut out: Vec<ContentRecord> = inner
            .records
            .iter()
            .filter(|s| s.record.ai_processed && s.record.embedding.is_none())
            .map(|s| s.record.clone())
            .collect();
        out.sort_by(newest_first);
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn save_translation(&self, id: i64, language: &str, data: &serde_json::Value) -> Result<()> {
        let mut inner = self.write()?;
        inner.record_mut(id)?.translation = Some((language.to_string(), data.clone()));
        Ok(())
    }

    async fn append_enrichment_log(&self, entry: &EnrichmentLogEntry) -> Result<()> {
        self.write()?.log.push(entry.clone());
        Ok(())
    }

    async fn scan(
        &self,
        filter: &ContentFilter,
        viewer: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RecordHit>> {
        let inner = self.read()?;
        let mut rows: Vec<&ContentRecord> = inner.filtered(filter, viewer).collect();
        rows.sort_by(|a, b| newest_first(a, b));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|r| inner.hit(r, viewer))
            .collect())
    }

    async fn vector_search(
        &self,
        query: &QueryVectors,
        filter: &ContentFilter,
        viewer: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecordHit>> {
        let inner = self.read()?;
        let mut hits: Vec<RecordHit> = inner
            .filtered(filter, viewer)
            .filter_map(|r| {
                let emb = r.embedding.as_ref()?;
                let mut hit = inner.hit(r, viewer);
                hit.similarity = Some(query.score(emb));
                Some(hit)
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }

    async fn stats(&self, filter: &ContentFilter, viewer: Option<&str>) -> Result<CorpusStats> {
        let inner = self.read()?;
        let mut stats = CorpusStats {
            global_total: inner.records.len() as i64,
            ..Default::default()
        };
        for r in inner.filtered(filter, viewer) {
            stats.filtered_total += 1;
            stats.ai_processed += r.ai_processed as i64;
            stats.highlighted += r.highlight as i64;
            stats.bookmarked += inner.is_bookmarked(viewer, r.id) as i64;
        }

        let mut per_source: BTreeMap<String, SourceCount> = BTreeMap::new();
        for s in &inner.sources {
            per_source.insert(
                s.key.clone(),
                SourceCount {
                    source: s.key.clone(),
                    name: s.name.clone(),
                    count: 0,
                },
            );
        }
        for stored in &inner.records {
            if let Some(key) = inner.source_key(&stored.record) {
                if let Some(c) = per_source.get_mut(&key) {
                    c.count += 1;
                }
            }
        }
        stats.per_source = per_source.into_values().collect();
        stats.per_source.sort_by(|a, b| b.count.cmp(&a.count).then(a.source.cmp(&b.source)));
        Ok(stats)
    }

    async fn trending(&self, limit: i64) -> Result<Vec<ContentRecord>> {
        let inner = self.read()?;
        let mut out: Vec<ContentRecord> = inner.records.iter().map(|s| s.record.clone()).collect();
        out.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then(b.published_at.cmp(&a.published_at))
        });
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}
