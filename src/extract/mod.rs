//! Article extraction: render → select → sanitize → viability check →
//! media rehost.
//!
//! The page is loaded through the current proxy when one is configured. A
//! transport-class failure through the proxy gets exactly one retry in a
//! fresh session without it. Text shorter than
//! `extraction.min_text_chars` is rejected as
//! [`PipelineError::ContentTooShort`].

pub mod browser;
pub mod media;
pub mod readability;
pub mod sanitize;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::Html;
use url::Url;

use newsroom_core::models::ExtractedArticle;

use crate::config::Config;
use crate::error::PipelineError;
use crate::storage;
use crate::transport::Transport;

use self::browser::ChromePageLoader;
use self::media::MediaRehoster;

const EXCERPT_CHARS: usize = 200;

/// Renders a URL to HTML.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &str, proxy: Option<&str>) -> Result<String>;
}

pub struct ContentExtractor {
    loader: Arc<dyn PageLoader>,
    transport: Transport,
    media: Option<MediaRehoster>,
    min_text_chars: usize,
}

impl ContentExtractor {
    pub fn new(
        loader: Arc<dyn PageLoader>,
        transport: Transport,
        media: Option<MediaRehoster>,
        min_text_chars: usize,
    ) -> Self {
        Self {
            loader,
            transport,
            media,
            min_text_chars,
        }
    }

    /// Chrome loader plus the configured media store.
    pub fn from_config(config: &Config, transport: Transport) -> Result<Self> {
        let loader = Arc::new(ChromePageLoader::new(&config.extraction, transport.user_agent()));
        let media = storage::from_config(&config.storage)?.map(|store| {
            MediaRehoster::new(
                transport.clone(),
                store,
                Duration::from_secs(config.extraction.media_timeout_secs),
            )
        });
        Ok(Self::new(loader, transport, media, config.extraction.min_text_chars))
    }

    pub async fn extract(&self, url: &str) -> Result<ExtractedArticle> {
        let base = Url::parse(url).with_context(|| format!("invalid article URL: {}", url))?;
        let html = self.render(url).await?;

        let (title, published_at, mut fragment) = {
            let doc = Html::parse_document(&html);
            let readable = readability::find_article(&doc)
                .ok_or(PipelineError::ContentTooShort {
                    chars: 0,
                    min: self.min_text_chars,
                })?;
            let fragment = sanitize::sanitize(readable.body, &base, readable.inside_article);
            (readable.title, readable.published_at, fragment)
        };

        let text = fragment.text();
        let chars = text.chars().count();
        if chars < self.min_text_chars {
            return Err(PipelineError::ContentTooShort {
                chars,
                min: self.min_text_chars,
            }
            .into());
        }

        if let Some(ref media) = self.media {
            let report = media.rehost(&mut fragment).await;
            tracing::debug!(url, rehosted = report.rehosted, failed = report.failed, "media rehost");
        }

        Ok(ExtractedArticle {
            title: title.unwrap_or_default(),
            content: fragment.to_html(),
            excerpt: text.chars().take(EXCERPT_CHARS).collect(),
            published_at,
        })
    }

    async fn render(&self, url: &str) -> Result<String> {
        let proxy = self.transport.proxy_url().await?;
        match proxy {
            Some(ref p) => match self.loader.load(url, Some(p)).await {
                Ok(html) => Ok(html),
                Err(e) if PipelineError::is_transport(&e) => {
                    tracing::warn!(url, error = %format!("{:#}", e), "page load via proxy failed, retrying direct");
                    self.loader.load(url, None).await
                }
                Err(e) => Err(e),
            },
            None => self.loader.load(url, None).await,
        }
    }
}
