use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect and create every table that does not exist yet.
pub async fn run_migrations(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    Ok(pool)
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    // Singleton settings rows.
    sqlx::query("INSERT OR IGNORE INTO ai_settings (id) VALUES (1)")
        .execute(pool)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO proxy_settings (id) VALUES (1)")
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        category TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        owner TEXT,
        last_fetched_at INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    // Raw entries are an audit trail: cascade with the source, never updated.
    r#"
    CREATE TABLE IF NOT EXISTS raw_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        external_id TEXT,
        canonical_url TEXT NOT NULL,
        title TEXT NOT NULL,
        author TEXT,
        published_at INTEGER,
        payload TEXT NOT NULL,
        payload_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS raw_entries_external_key
        ON raw_entries(source_id, external_id) WHERE external_id IS NOT NULL
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS raw_entries_url_key
        ON raw_entries(source_id, canonical_url) WHERE external_id IS NULL
    "#,
    // No ON DELETE CASCADE: source removal deletes content explicitly.
    r#"
    CREATE TABLE IF NOT EXISTS content_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        raw_entry_id INTEGER UNIQUE REFERENCES raw_entries(id) ON DELETE SET NULL,
        source_id INTEGER,
        source_name TEXT,
        title TEXT NOT NULL,
        url TEXT NOT NULL,
        snippet TEXT NOT NULL DEFAULT '',
        content TEXT,
        category TEXT,
        ai_category TEXT,
        ai_summary TEXT,
        ai_processed INTEGER NOT NULL DEFAULT 0,
        sentiment TEXT,
        importance INTEGER,
        highlight INTEGER NOT NULL DEFAULT 0,
        tags_json TEXT NOT NULL DEFAULT '[]',
        embedding BLOB,
        embedding_model TEXT,
        translation_language TEXT,
        translation_data TEXT,
        published_at INTEGER,
        crawled_at INTEGER,
        crawl_status TEXT NOT NULL DEFAULT 'pending',
        crawl_attempts INTEGER NOT NULL DEFAULT 0,
        enrich_attempts INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS content_records_published
        ON content_records(published_at DESC, importance DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS content_records_source ON content_records(source_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bookmarks (
        viewer_id TEXT NOT NULL,
        content_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (viewer_id, content_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS enrichment_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_id INTEGER NOT NULL,
        provider TEXT NOT NULL,
        model TEXT NOT NULL,
        output TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS model_configs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        provider TEXT NOT NULL,
        role TEXT NOT NULL,
        base_url TEXT,
        api_key TEXT,
        model TEXT NOT NULL,
        temperature REAL,
        enabled INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        summary_model_id INTEGER,
        translation_model_id INTEGER,
        embedding_model_id INTEGER,
        rerank_model_id INTEGER,
        relevance_threshold REAL,
        summary_length INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS proxy_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        enabled INTEGER NOT NULL DEFAULT 0,
        protocol TEXT NOT NULL DEFAULT 'http',
        host TEXT NOT NULL DEFAULT '',
        port INTEGER NOT NULL DEFAULT 0,
        username TEXT,
        password TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        task_type TEXT NOT NULL,
        cron TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        config_json TEXT NOT NULL DEFAULT '{}',
        last_run_at INTEGER,
        last_status TEXT NOT NULL DEFAULT 'idle',
        last_error TEXT
    )
    "#,
];
