//! Feed refresh: fetch → parse → dedup insert, per source.
//!
//! A single source failing (network, malformed XML) is logged and
//! reported; it never stops the remaining sources.

use anyhow::Result;
use serde::Serialize;

use newsroom_core::ingest::{ingest_entries, IngestReport};
use newsroom_core::models::Source;

use crate::context::AppContext;
use crate::sources;

/// Outcome of refreshing one source.
#[derive(Debug, Serialize)]
pub struct SourceRefresh {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IngestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RefreshSummary {
    pub sources: Vec<SourceRefresh>,
    pub newly_ingested: usize,
    pub failed_sources: usize,
}

pub async fn refresh_source(ctx: &AppContext, source: &Source) -> Result<IngestReport> {
    let feed = ctx.feeds.fetch(&source.url).await?;
    let now = chrono::Utc::now().timestamp();
    let report = ingest_entries(ctx.store.as_ref(), source, &feed.entries, now).await?;

    for skipped in &report.skipped {
        tracing::warn!(
            source = %source.key,
            index = skipped.index,
            reason = %skipped.reason,
            "skipped feed entry"
        );
    }
    tracing::info!(
        source = %source.key,
        fetched = report.fetched,
        new = report.newly_ingested,
        duplicates = report.duplicates,
        "source refreshed"
    );
    Ok(report)
}

/// Refresh every enabled source, or just `only` when given.
pub async fn refresh_all(ctx: &AppContext, only: Option<&str>) -> Result<RefreshSummary> {
    let targets = match only {
        Some(key) => vec![sources::find_source(&ctx.pool, key).await?],
        None => sources::enabled_sources(&ctx.pool).await?,
    };

    let mut summary = RefreshSummary::default();
    for source in &targets {
        match refresh_source(ctx, source).await {
            Ok(report) => {
                summary.newly_ingested += report.newly_ingested;
                summary.sources.push(SourceRefresh {
                    source: source.key.clone(),
                    report: Some(report),
                    error: None,
                });
            }
            Err(e) => {
                tracing::error!(source = %source.key, error = %format!("{:#}", e), "source refresh failed");
                summary.failed_sources += 1;
                summary.sources.push(SourceRefresh {
                    source: source.key.clone(),
                    report: None,
                    error: Some(format!("{:#}", e)),
                });
            }
        }
    }
    Ok(summary)
}
