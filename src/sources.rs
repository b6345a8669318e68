//! Source registry: list, add, toggle and remove feed sources.
//!
//! Adding a source validates the feed first; removing one goes through
//! [`Store::delete_source`] so content records are deleted explicitly.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use newsroom_core::models::{NewSource, Source};
use newsroom_core::store::{DeletedCounts, Store};

use crate::error::PipelineError;
use crate::feed::FeedClient;

fn source_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        category: row.try_get("category")?,
        enabled: row.try_get("enabled")?,
        owner: row.try_get("owner")?,
        last_fetched_at: row.try_get("last_fetched_at")?,
    })
}

const SOURCE_COLUMNS: &str =
    "SELECT id, key, name, url, category, enabled, owner, last_fetched_at FROM sources";

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query(&format!("{} ORDER BY key", SOURCE_COLUMNS))
        .fetch_all(pool)
        .await?;
    rows.iter().map(source_from_row).collect()
}

pub async fn enabled_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query(&format!("{} WHERE enabled = 1 ORDER BY key", SOURCE_COLUMNS))
        .fetch_all(pool)
        .await?;
    rows.iter().map(source_from_row).collect()
}

pub async fn get_source(pool: &SqlitePool, id: i64) -> Result<Option<Source>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SOURCE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(source_from_row).transpose()
}

pub async fn find_source(pool: &SqlitePool, key: &str) -> Result<Source> {
    let row = sqlx::query(&format!("{} WHERE key = ?", SOURCE_COLUMNS))
        .bind(key)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(r) => source_from_row(&r),
        None => Err(PipelineError::NotFound(format!("source '{}'", key)).into()),
    }
}

/// Insert a source without touching the network.
pub async fn insert_source(pool: &SqlitePool, new: &NewSource) -> Result<Source> {
    if new.key.trim().is_empty() || new.url.trim().is_empty() {
        return Err(PipelineError::invalid("source key and url must not be empty").into());
    }
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO sources (key, name, url, category, owner, created_at) VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(new.key.trim())
    .bind(&new.name)
    .bind(new.url.trim())
    .bind(&new.category)
    .bind(&new.owner)
    .bind(chrono::Utc::now().timestamp())
    .fetch_one(pool)
    .await?;

    get_source(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("source {} vanished after insert", id))
}

/// Validate the feed URL, then insert the source.
pub async fn add_source(pool: &SqlitePool, feeds: &FeedClient, new: &NewSource) -> Result<Source> {
    let check = feeds.validate(&new.url).await?;
    if !check.valid {
        return Err(PipelineError::invalid(format!("{} does not look like an RSS or Atom feed", new.url)).into());
    }
    insert_source(pool, new).await
}

pub async fn set_enabled(pool: &SqlitePool, key: &str, enabled: bool) -> Result<()> {
    let done = sqlx::query("UPDATE sources SET enabled = ? WHERE key = ?")
        .bind(enabled)
        .bind(key)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(PipelineError::NotFound(format!("source '{}'", key)).into());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct RemovedSource {
    pub source: Source,
    pub deleted: DeletedCounts,
}

pub async fn remove_source(pool: &SqlitePool, store: &dyn Store, key: &str) -> Result<RemovedSource> {
    let source = find_source(pool, key).await?;
    let deleted = store.delete_source(source.id).await?;
    tracing::info!(
        source = %source.key,
        content_records = deleted.content_records,
        raw_entries = deleted.raw_entries,
        "source removed"
    );
    Ok(RemovedSource { source, deleted })
}
