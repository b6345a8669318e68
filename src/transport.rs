//! Outbound HTTP transport with optional proxy.
//!
//! The proxy record is read from the database on every call, so an
//! operator can change or disable it between batch items. Requests that
//! fail for proxy-specific reasons are retried once without the proxy.

use std::time::Duration;

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::error::PipelineError;
use crate::settings;

/// Outbound HTTP policy shared by feed fetching, media download and AI calls.
#[derive(Clone)]
pub struct Transport {
    pool: Option<SqlitePool>,
    user_agent: String,
}

/// Body and content type of a successful GET.
#[derive(Debug)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub final_url: String,
}

impl Transport {
    pub fn new(pool: SqlitePool, user_agent: impl Into<String>) -> Self {
        Self {
            pool: Some(pool),
            user_agent: user_agent.into(),
        }
    }

    /// Transport that never uses a proxy.
    pub fn direct(user_agent: impl Into<String>) -> Self {
        Self {
            pool: None,
            user_agent: user_agent.into(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Current proxy URL, read fresh.
    pub async fn proxy_url(&self) -> Result<Option<String>> {
        match &self.pool {
            Some(pool) => Ok(settings::load_proxy(pool).await?.url()),
            None => Ok(None),
        }
    }

    /// Build a one-shot client. No connection reuse across calls.
    pub fn client(&self, proxy: Option<&str>, timeout: Duration) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(self.user_agent.clone());
        builder = match proxy {
            Some(url) => builder.proxy(reqwest::Proxy::all(url)?),
            None => builder.no_proxy(),
        };
        Ok(builder.build()?)
    }

    /// GET `url` through the proxy if one is configured, falling back to a
    /// direct connection when the proxy itself fails.
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<Fetched> {
        let proxy = self.proxy_url().await?;
        if let Some(ref p) = proxy {
            match self.get_once(url, Some(p), timeout).await {
                Ok(f) => return Ok(f),
                Err(e) if is_proxy_failure(&e) => {
                    tracing::warn!(url, error = %e, "proxy request failed, retrying direct");
                }
                Err(e) => return Err(e),
            }
        }
        self.get_once(url, None, timeout).await
    }

    async fn get_once(&self, url: &str, proxy: Option<&str>, timeout: Duration) -> Result<Fetched> {
        let client = self.client(proxy, timeout)?;
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(describe(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("GET {} failed (HTTP {})", url, status);
        }

        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::Transport(describe(&e)))?;

        Ok(Fetched {
            bytes: bytes.to_vec(),
            content_type,
            final_url,
        })
    }
}

/// Flatten a reqwest error and its sources into one line.
pub fn describe(err: &reqwest::Error) -> String {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    if err.is_timeout() {
        msg.push_str(" (timed out)");
    }
    msg
}

/// Whether a failed request is worth retrying without the proxy.
pub fn is_proxy_failure(err: &anyhow::Error) -> bool {
    match PipelineError::classify(err) {
        Some(PipelineError::Transport(msg)) => {
            let msg = msg.to_lowercase();
            ["proxy", "tunnel", "connection refused", "econnrefused", "socks", "error trying to connect"]
                .iter()
                .any(|needle| msg.contains(needle))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_failure_classification() {
        let e: anyhow::Error =
            PipelineError::Transport("error sending request: proxy tunnel failed".into()).into();
        assert!(is_proxy_failure(&e));

        let e: anyhow::Error = PipelineError::Transport("dns error: no such host".into()).into();
        assert!(!is_proxy_failure(&e));

        let e = anyhow::anyhow!("GET x failed (HTTP 404)");
        assert!(!is_proxy_failure(&e));
    }

    #[tokio::test]
    async fn test_direct_transport_has_no_proxy() {
        let t = Transport::direct("test-agent");
        assert!(t.proxy_url().await.unwrap().is_none());
        assert!(t.client(None, Duration::from_secs(1)).is_ok());
    }
}
