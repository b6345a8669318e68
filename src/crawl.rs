//! Crawl orchestration: extract article bodies for ingested records and
//! persist the outcome as a crawl status.
//!
//! | Result | Status | Retried by the backlog |
//! |--------|--------|------------------------|
//! | extracted | `ok` | no |
//! | not http(s) | `invalid_url` | no |
//! | [`PipelineError::ContentTooShort`] | `too_short` | no |
//! | anything else | `failed` | until `extraction.max_attempts` |

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use url::Url;

use newsroom_core::models::{ContentRecord, CrawlStatus};
use newsroom_core::store::Store;

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::extract::ContentExtractor;

#[derive(Debug, Serialize)]
pub struct CrawlOutcome {
    pub id: i64,
    pub status: CrawlStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct CrawlReport {
    pub attempted: usize,
    pub ok: usize,
    pub too_short: usize,
    pub failed: usize,
    pub items: Vec<CrawlOutcome>,
}

fn is_crawlable(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Extract one record and store the result. Failures become a status on
/// the record and are reported in the outcome, not returned as errors.
pub async fn crawl_with(
    store: &dyn Store,
    extractor: &ContentExtractor,
    record: &ContentRecord,
) -> Result<CrawlOutcome> {
    let now = chrono::Utc::now().timestamp();

    if !is_crawlable(&record.url) {
        store.mark_crawl(record.id, CrawlStatus::InvalidUrl, now).await?;
        tracing::warn!(id = record.id, url = %record.url, "not crawlable");
        return Ok(CrawlOutcome {
            id: record.id,
            status: CrawlStatus::InvalidUrl,
            chars: None,
            error: Some(format!("invalid article URL: {}", record.url)),
        });
    }

    match extractor.extract(&record.url).await {
        Ok(article) => {
            let chars = article.content.chars().count();
            store.save_extraction(record.id, &article, now).await?;
            tracing::info!(id = record.id, chars, "article extracted");
            Ok(CrawlOutcome {
                id: record.id,
                status: CrawlStatus::Ok,
                chars: Some(chars),
                error: None,
            })
        }
        Err(e) => {
            let status = match PipelineError::classify(&e) {
                Some(PipelineError::ContentTooShort { .. }) => CrawlStatus::TooShort,
                _ => CrawlStatus::Failed,
            };
            store.mark_crawl(record.id, status, now).await?;
            tracing::warn!(id = record.id, url = %record.url, status = status.as_str(), error = %format!("{:#}", e), "crawl failed");
            Ok(CrawlOutcome {
                id: record.id,
                status,
                chars: None,
                error: Some(format!("{:#}", e)),
            })
        }
    }
}

/// Manual trigger for one record.
pub async fn crawl_record(ctx: &AppContext, id: i64) -> Result<CrawlOutcome> {
    let record = ctx
        .store
        .get_record(id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("content record {}", id)))?;
    let extractor = ContentExtractor::from_config(&ctx.config, ctx.transport.clone())?;
    crawl_with(ctx.store.as_ref(), &extractor, &record).await
}

/// Crawl the pending backlog, pausing `extraction.delay_ms` between pages.
pub async fn crawl_backlog(ctx: &AppContext) -> Result<CrawlReport> {
    let cfg = &ctx.config.extraction;
    let extractor = ContentExtractor::from_config(&ctx.config, ctx.transport.clone())?;
    let backlog = ctx.store.crawl_backlog(cfg.batch_size, cfg.max_attempts).await?;
    backlog_with(
        ctx.store.as_ref(),
        &extractor,
        &backlog,
        Duration::from_millis(cfg.delay_ms),
    )
    .await
}

pub async fn backlog_with(
    store: &dyn Store,
    extractor: &ContentExtractor,
    records: &[ContentRecord],
    delay: Duration,
) -> Result<CrawlReport> {
    let mut report = CrawlReport::default();
    for (i, record) in records.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = crawl_with(store, extractor, record).await?;
        report.attempted += 1;
        match outcome.status {
            CrawlStatus::Ok => report.ok += 1,
            CrawlStatus::TooShort => report.too_short += 1,
            _ => report.failed += 1,
        }
        report.items.push(outcome);
    }
    tracing::info!(
        attempted = report.attempted,
        ok = report.ok,
        too_short = report.too_short,
        failed = report.failed,
        "crawl backlog run"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PageLoader;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use newsroom_core::store::memory::InMemoryStore;
    use std::sync::Arc;

    struct PageByPath;

    #[async_trait]
    impl PageLoader for PageByPath {
        async fn load(&self, url: &str, _proxy: Option<&str>) -> Result<String> {
            if url.ends_with("/down") {
                return Err(PipelineError::Transport("net::ERR_CONNECTION_REFUSED".into()).into());
            }
            let words = if url.ends_with("/short") { 3 } else { 60 };
            Ok(format!(
                "<html><body><article><h1>Headline</h1><p>{}</p></article></body></html>",
                "word ".repeat(words)
            ))
        }
    }

    fn record(url: &str) -> ContentRecord {
        ContentRecord {
            id: 0,
            raw_entry_id: None,
            source_id: None,
            source_name: None,
            title: "Feed title".into(),
            url: url.into(),
            snippet: "s".into(),
            content: None,
            category: None,
            ai_category: None,
            ai_summary: None,
            ai_processed: false,
            sentiment: None,
            importance: None,
            highlight: false,
            tags: vec![],
            published_at: Some(1),
            crawled_at: None,
            crawl_status: CrawlStatus::Pending,
            updated_at: 1,
            embedding: None,
        }
    }

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(Arc::new(PageByPath), Transport::direct("t"), None, 100)
    }

    #[tokio::test]
    async fn test_statuses_per_outcome() {
        let store = InMemoryStore::new();
        let mut records = Vec::new();
        for url in [
            "https://n.test/ok",
            "https://n.test/short",
            "https://n.test/down",
            "mailto:desk@n.test",
        ] {
            let id = store.insert_record(record(url)).unwrap();
            records.push(store.get_record(id).await.unwrap().unwrap());
        }

        let report = backlog_with(&store, &extractor(), &records, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(report.attempted, 4);
        assert_eq!((report.ok, report.too_short, report.failed), (1, 1, 2));

        let ok = store.get_record(records[0].id).await.unwrap().unwrap();
        assert_eq!(ok.crawl_status, CrawlStatus::Ok);
        assert_eq!(ok.title, "Headline");
        assert!(ok.content.unwrap().contains("<p>word word"));

        let statuses: Vec<CrawlStatus> = report.items.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![CrawlStatus::Ok, CrawlStatus::TooShort, CrawlStatus::Failed, CrawlStatus::InvalidUrl]
        );
    }

    #[tokio::test]
    async fn test_failed_records_leave_backlog_after_max_attempts() {
        let store = InMemoryStore::new();
        let id = store.insert_record(record("https://n.test/down")).unwrap();
        let ex = extractor();
        for _ in 0..3 {
            let backlog = store.crawl_backlog(10, 3).await.unwrap();
            assert_eq!(backlog.len(), 1);
            crawl_with(&store, &ex, &backlog[0]).await.unwrap();
        }
        assert!(store.crawl_backlog(10, 3).await.unwrap().is_empty());
        assert_eq!(
            store.get_record(id).await.unwrap().unwrap().crawl_status,
            CrawlStatus::Failed
        );
    }
}
