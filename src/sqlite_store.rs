//! SQLite-backed [`Store`] implementation.
//!
//! Filters are rendered once by [`push_filter`] and shared by the scan,
//! the vector candidate query and the filtered statistics, so every
//! retrieval path sees the same record set.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use newsroom_core::dedup::{payload_hash, EntryIdentity};
use newsroom_core::embedding::{blob_to_vec, vec_to_blob, QueryVectors};
use newsroom_core::models::{
    ContentFilter, ContentRecord, CrawlStatus, Enrichment, ExtractedArticle, FeedEntry, Sentiment,
    Source,
};
use newsroom_core::store::{
    CorpusStats, DeletedCounts, EnrichmentLogEntry, IngestOutcome, RecordHit, SourceCount, Store,
};

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const LIST_COLUMNS: &str = "c.id, c.raw_entry_id, c.source_id, c.source_name, c.title, c.url, \
     c.snippet, NULL AS content, c.category, c.ai_category, c.ai_summary, c.ai_processed, \
     c.sentiment, c.importance, c.highlight, c.tags_json, c.published_at, c.crawled_at, \
     c.crawl_status, c.updated_at, s.key AS source_key, \
     (b.content_id IS NOT NULL) AS bookmarked";

const ORDER_NEWEST: &str = " ORDER BY c.published_at DESC, c.importance DESC, c.id DESC";

/// `SELECT <columns> FROM content_records c` joined with its source and the
/// viewer's bookmark (absent viewer joins nothing).
fn select_from(columns: &str, viewer: Option<&str>) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(columns);
    qb.push(
        " FROM content_records c \
         LEFT JOIN sources s ON s.id = c.source_id \
         LEFT JOIN bookmarks b ON b.content_id = c.id AND ",
    );
    match viewer {
        Some(v) => {
            qb.push("b.viewer_id = ");
            qb.push_bind(v.to_string());
        }
        None => {
            qb.push("0");
        }
    }
    qb.push(" WHERE 1=1");
    qb
}

fn push_filter(qb: &mut QueryBuilder<'static, Sqlite>, filter: &ContentFilter) {
    if let Some(ref source) = filter.source {
        qb.push(" AND s.key = ");
        qb.push_bind(source.clone());
    }
    if let Some(ref category) = filter.category {
        qb.push(" AND c.category = ");
        qb.push_bind(category.clone());
    }
    if let Some(ref category) = filter.ai_category {
        qb.push(" AND c.ai_category = ");
        qb.push_bind(category.clone());
    }
    if filter.bookmarked_only {
        qb.push(" AND b.content_id IS NOT NULL");
    }
    if let Some(text) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", escape_like(&text.to_lowercase()));
        qb.push(" AND (LOWER(c.title) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR LOWER(c.snippet) LIKE ");
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\')");
    }
    if let Some(after) = filter.published_after {
        qb.push(" AND c.published_at >= ");
        qb.push_bind(after);
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn record_from_row(row: &SqliteRow) -> Result<ContentRecord> {
    let tags_json: String = row.try_get("tags_json")?;
    let sentiment: Option<String> = row.try_get("sentiment")?;
    let crawl_status: String = row.try_get("crawl_status")?;
    Ok(ContentRecord {
        id: row.try_get("id")?,
        raw_entry_id: row.try_get("raw_entry_id")?,
        source_id: row.try_get("source_id")?,
        source_name: row.try_get("source_name")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        snippet: row.try_get("snippet")?,
        content: row.try_get("content")?,
        category: row.try_get("category")?,
        ai_category: row.try_get("ai_category")?,
        ai_summary: row.try_get("ai_summary")?,
        ai_processed: row.try_get("ai_processed")?,
        sentiment: sentiment.as_deref().map(Sentiment::parse_lenient),
        importance: row.try_get("importance")?,
        highlight: row.try_get("highlight")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        published_at: row.try_get("published_at")?,
        crawled_at: row.try_get("crawled_at")?,
        crawl_status: CrawlStatus::parse(&crawl_status),
        updated_at: row.try_get("updated_at")?,
        embedding: None,
    })
}

fn hit_from_row(row: &SqliteRow) -> Result<RecordHit> {
    Ok(RecordHit {
        record: record_from_row(row)?,
        source_key: row.try_get("source_key")?,
        bookmarked: row.try_get("bookmarked")?,
        similarity: None,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_entry(
        &self,
        source: &Source,
        entry: &FeedEntry,
        identity: &EntryIdentity,
        payload: &str,
        now: i64,
    ) -> Result<IngestOutcome> {
        let mut tx = self.pool.begin().await?;

        let raw_entry_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO raw_entries (source_id, external_id, canonical_url, title, author,
                                     published_at, payload, payload_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(source.id)
        .bind(identity.external_id())
        .bind(&identity.canonical_url)
        .bind(entry.title.as_deref().unwrap_or_default())
        .bind(&entry.author)
        .bind(entry.published_at)
        .bind(payload)
        .bind(payload_hash(payload))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let raw_entry_id = match raw_entry_id {
            Some(id) => id,
            None => {
                tx.rollback().await?;
                return Ok(IngestOutcome::Duplicate);
            }
        };

        let record =
            ContentRecord::from_entry(source, raw_entry_id, entry, &identity.canonical_url, now);
        let content_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO content_records (raw_entry_id, source_id, source_name, title, url,
                                         snippet, content, category, tags_json,
                                         published_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(raw_entry_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(raw_entry_id)
        .bind(record.source_id)
        .bind(&record.source_name)
        .bind(&record.title)
        .bind(&record.url)
        .bind(&record.snippet)
        .bind(&record.content)
        .bind(&record.category)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(record.published_at)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(match content_id {
            Some(content_id) => IngestOutcome::Inserted {
                raw_entry_id,
                content_id,
            },
            None => IngestOutcome::Duplicate,
        })
    }

    async fn mark_source_fetched(&self, source_id: i64, at: i64) -> Result<()> {
        sqlx::query("UPDATE sources SET last_fetched_at = ? WHERE id = ?")
            .bind(at)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_source(&self, source_id: i64) -> Result<DeletedCounts> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM bookmarks WHERE content_id IN (SELECT id FROM content_records WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        let content = sqlx::query("DELETE FROM content_records WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        let raw_entries: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM raw_entries WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(DeletedCounts {
            content_records: content.rows_affected() as i64,
            raw_entries,
        })
    }

    async fn get_record(&self, id: i64) -> Result<Option<ContentRecord>> {
        let columns = LIST_COLUMNS.replace("NULL AS content", "c.content");
        let mut qb = select_from(&columns, None);
        qb.push(" AND c.id = ");
        qb.push_bind(id);
        let row = qb.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn save_extraction(&self, id: i64, article: &ExtractedArticle, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE content_records SET
                title = CASE WHEN ? = '' THEN title ELSE ? END,
                content = ?,
                snippet = ?,
                published_at = COALESCE(?, published_at),
                crawled_at = ?,
                crawl_status = 'ok',
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&article.title)
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.excerpt)
        .bind(article.published_at)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_crawl(&self, id: i64, status: CrawlStatus, now: i64) -> Result<()> {
        sqlx::query(
            "UPDATE content_records SET crawl_status = ?, crawl_attempts = crawl_attempts + 1, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn crawl_backlog(&self, limit: i64, max_attempts: i64) -> Result<Vec<ContentRecord>> {
        let mut qb = select_from(LIST_COLUMNS, None);
        qb.push(
            " AND c.crawled_at IS NULL AND (c.crawl_status = 'pending' \
             OR (c.crawl_status = 'failed' AND c.crawl_attempts < ",
        );
        qb.push_bind(max_attempts);
        qb.push("))");
        qb.push(ORDER_NEWEST);
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn save_enrichment(&self, id: i64, e: &Enrichment, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE content_records SET
                ai_summary = ?, sentiment = ?, importance = ?, highlight = ?,
                ai_category = ?, ai_processed = 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&e.summary)
        .bind(e.sentiment.as_str())
        .bind(e.importance)
        .bind(e.highlight)
        .bind(&e.category)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_enrich_failed(&self, id: i64, now: i64) -> Result<()> {
        sqlx::query("UPDATE content_records SET enrich_attempts = enrich_attempts + 1, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enrichment_backlog(&self, limit: i64, max_attempts: i64) -> Result<Vec<ContentRecord>> {
        let columns = LIST_COLUMNS.replace("NULL AS content", "c.content");
        let mut qb = select_from(&columns, None);
        qb.push(" AND c.ai_processed = 0 AND c.enrich_attempts < ");
        qb.push_bind(max_attempts);
        qb.push(ORDER_NEWEST);
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn set_embedding(&self, id: i64, vector: &[f32], model: &str) -> Result<()> {
        sqlx::query("UPDATE content_records SET embedding = ?, embedding_model = ? WHERE id = ?")
            .bind(vec_to_blob(vector))
            .bind(model)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn embedding_backlog(&self, limit: i64) -> Result<Vec<ContentRecord>> {
        let mut qb = select_from(LIST_COLUMNS, None);
        qb.push(" AND c.ai_processed = 1 AND c.embedding IS NULL");
        qb.push(ORDER_NEWEST);
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn save_translation(&self, id: i64, language: &str, data: &serde_json::Value) -> Result<()> {
        sqlx::query(
            "UPDATE content_records SET translation_language = ?, translation_data = ? WHERE id = ?",
        )
        .bind(language)
        .bind(data.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_enrichment_log(&self, entry: &EnrichmentLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO enrichment_log (content_id, provider, model, output, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.content_id)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(&entry.output)
        .bind(&entry.status)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn scan(
        &self,
        filter: &ContentFilter,
        viewer: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RecordHit>> {
        let mut qb = select_from(LIST_COLUMNS, viewer);
        push_filter(&mut qb, filter);
        qb.push(ORDER_NEWEST);
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(hit_from_row).collect()
    }

    async fn vector_search(
        &self,
        query: &QueryVectors,
        filter: &ContentFilter,
        viewer: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecordHit>> {
        let columns = format!("{}, c.embedding", LIST_COLUMNS);
        let mut qb = select_from(&columns, viewer);
        push_filter(&mut qb, filter);
        qb.push(" AND c.embedding IS NOT NULL");
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let mut hit = hit_from_row(row)?;
            hit.similarity = Some(query.score(&blob_to_vec(&blob)));
            hits.push(hit);
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }

    async fn stats(&self, filter: &ContentFilter, viewer: Option<&str>) -> Result<CorpusStats> {
        let global_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_records")
            .fetch_one(&self.pool)
            .await?;

        let mut qb = select_from(
            "COUNT(*) AS total, \
             COALESCE(SUM(c.ai_processed), 0) AS ai_processed, \
             COALESCE(SUM(c.highlight), 0) AS highlighted, \
             COALESCE(SUM(CASE WHEN b.content_id IS NOT NULL THEN 1 ELSE 0 END), 0) AS bookmarked",
            viewer,
        );
        push_filter(&mut qb, filter);
        let row = qb.build().fetch_one(&self.pool).await?;

        let per_source = sqlx::query(
            r#"
            SELECT s.key, s.name, COUNT(c.id) AS count
            FROM sources s
            LEFT JOIN content_records c ON c.source_id = s.id
            GROUP BY s.id
            ORDER BY count DESC, s.key ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| -> Result<SourceCount> {
            Ok(SourceCount {
                source: r.try_get("key")?,
                name: r.try_get("name")?,
                count: r.try_get("count")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(CorpusStats {
            global_total,
            filtered_total: row.try_get("total")?,
            ai_processed: row.try_get("ai_processed")?,
            highlighted: row.try_get("highlighted")?,
            bookmarked: row.try_get("bookmarked")?,
            per_source,
        })
    }

    async fn trending(&self, limit: i64) -> Result<Vec<ContentRecord>> {
        let mut qb = select_from(LIST_COLUMNS, None);
        qb.push(" ORDER BY c.importance DESC, c.published_at DESC LIMIT ");
        qb.push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }
}
