//! Configuration parsing and validation.
//!
//! Newsroom is configured with one TOML file passed via `--config`.
//! Every section except `[db]` and `[server]` has defaults, so a minimal
//! file looks like:
//!
//! ```toml
//! [db]
//! path = "./data/newsroom.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! Model credentials, role assignments, the relevance threshold override,
//! proxy settings and scheduled tasks are runtime records in the database,
//! not file configuration.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Used when the settings row carries no threshold.
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
    #[serde(default = "default_overfetch")]
    pub overfetch: i64,
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            overfetch: default_overfetch(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_threshold() -> f64 {
    0.3
}
fn default_overfetch() -> i64 {
    5
}
fn default_page_size() -> i64 {
    20
}
fn default_max_page_size() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedsConfig {
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_feed_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_feed_timeout() -> u64 {
    20
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Extracted text shorter than this is `ContentTooShort`.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_scroll_steps")]
    pub max_scroll_steps: u32,
    #[serde(default = "default_scroll_pause")]
    pub scroll_pause_ms: u64,
    #[serde(default = "default_media_timeout")]
    pub media_timeout_secs: u64,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_crawl_batch")]
    pub batch_size: i64,
    #[serde(default = "default_crawl_delay")]
    pub delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            navigation_timeout_secs: default_navigation_timeout(),
            settle_ms: default_settle_ms(),
            max_scroll_steps: default_scroll_steps(),
            scroll_pause_ms: default_scroll_pause(),
            media_timeout_secs: default_media_timeout(),
            chrome_path: None,
            batch_size: default_crawl_batch(),
            delay_ms: default_crawl_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_min_text_chars() -> usize {
    100
}
fn default_navigation_timeout() -> u64 {
    30
}
fn default_settle_ms() -> u64 {
    1500
}
fn default_scroll_steps() -> u32 {
    12
}
fn default_scroll_pause() -> u64 {
    400
}
fn default_media_timeout() -> u64 {
    15
}
fn default_crawl_batch() -> i64 {
    20
}
fn default_crawl_delay() -> u64 {
    1000
}
fn default_max_attempts() -> i64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    /// Retries for 429 / 5xx / network errors, with exponential backoff.
    #[serde(default = "default_ai_retries")]
    pub max_retries: u32,
    #[serde(default = "default_summary_length")]
    pub summary_length: u32,
    #[serde(default = "default_translate_batch")]
    pub translate_batch_size: usize,
    #[serde(default = "default_enrich_batch")]
    pub enrich_batch_size: i64,
    /// Failed summary passes before a record leaves the backlog.
    #[serde(default = "default_max_enrich_attempts")]
    pub max_enrich_attempts: i64,
    #[serde(default = "default_backfill_batch")]
    pub backfill_batch_size: i64,
    #[serde(default = "default_target_language")]
    pub target_language: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_ai_timeout(),
            max_retries: default_ai_retries(),
            summary_length: default_summary_length(),
            translate_batch_size: default_translate_batch(),
            enrich_batch_size: default_enrich_batch(),
            max_enrich_attempts: default_max_enrich_attempts(),
            backfill_batch_size: default_backfill_batch(),
            target_language: default_target_language(),
        }
    }
}

fn default_ai_timeout() -> u64 {
    60
}
fn default_ai_retries() -> u32 {
    2
}
fn default_summary_length() -> u32 {
    5
}
fn default_translate_batch() -> usize {
    20
}
fn default_enrich_batch() -> i64 {
    10
}
fn default_max_enrich_attempts() -> i64 {
    3
}
fn default_backfill_batch() -> i64 {
    50
}
fn default_target_language() -> String {
    "English".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `disabled`, `local`, or `s3`.
    #[serde(default = "default_storage_kind")]
    pub kind: String,
    /// Directory for `local`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Prefix for returned URLs, e.g. `https://cdn.example.com/media`.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// S3-compatible endpoint (MinIO etc.). Path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Per-upload timeout for `s3`.
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_kind(),
            dir: None,
            public_base_url: None,
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            timeout_secs: default_upload_timeout(),
        }
    }
}

fn default_storage_kind() -> String {
    "disabled".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_upload_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.retrieval.default_threshold) {
        bail!("retrieval.default_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.overfetch < 1 {
        bail!("retrieval.overfetch must be >= 1");
    }
    if config.retrieval.max_page_size < 1 {
        bail!("retrieval.max_page_size must be >= 1");
    }
    if config.extraction.min_text_chars == 0 {
        bail!("extraction.min_text_chars must be > 0");
    }
    if config.extraction.batch_size < 1
        || config.ai.enrich_batch_size < 1
        || config.ai.max_enrich_attempts < 1
        || config.ai.backfill_batch_size < 1
        || config.ai.translate_batch_size == 0
    {
        bail!("batch sizes must be >= 1");
    }

    let storage = &config.storage;
    match storage.kind.as_str() {
        "disabled" => {}
        "local" => {
            if storage.dir.is_none() || storage.public_base_url.is_none() {
                bail!("storage.dir and storage.public_base_url are required for local storage");
            }
        }
        "s3" => {
            if storage.bucket.is_none() || storage.public_base_url.is_none() {
                bail!("storage.bucket and storage.public_base_url are required for s3 storage");
            }
            if storage.timeout_secs == 0 {
                bail!("storage.timeout_secs must be >= 1");
            }
        }
        other => bail!(
            "Unknown storage kind: '{}'. Must be disabled, local, or s3.",
            other
        ),
    }

    Ok(())
}
