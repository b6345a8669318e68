//! JSON POST with retry and exponential backoff.
//!
//! - HTTP 429 or 5xx → retry (1s, 2s, 4s, ... capped at 32s)
//! - other 4xx → fail immediately with [`HttpStatusError`]
//! - network error → retry, surfaced as [`PipelineError::Transport`]

use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;

use crate::error::PipelineError;
use crate::transport::{describe, Transport};

/// A non-success HTTP status from a provider.
#[derive(Debug, Error)]
#[error("provider returned HTTP {status}: {body}")]
pub struct HttpStatusError {
    pub status: u16,
    pub body: String,
}

impl HttpStatusError {
    /// Find an `HttpStatusError` in an error chain.
    pub fn find(err: &anyhow::Error) -> Option<&HttpStatusError> {
        err.chain().find_map(|e| e.downcast_ref::<HttpStatusError>())
    }
}

/// Connection policy for provider calls.
#[derive(Clone)]
pub struct HttpPolicy {
    pub transport: Transport,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl HttpPolicy {
    pub async fn post_json(&self, url: &str, headers: &[(&str, String)], body: &Value) -> Result<Value> {
        // Proxy settings are read once per logical call, not per retry.
        let proxy = self.transport.proxy_url().await?;
        let client = self.transport.client(proxy.as_deref(), self.timeout)?;

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = client.post(url).json(body);
            for (name, value) in headers {
                req = req.header(*name, value);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response
                            .text()
                            .await
                            .map_err(|e| PipelineError::Transport(describe(&e)))?;
                        return serde_json::from_str(&text).map_err(|e| {
                            PipelineError::ProviderResponse(format!("response is not JSON: {}", e)).into()
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = HttpStatusError {
                        status: status.as_u16(),
                        body: truncate(&body_text, 500),
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(url, attempt, status = status.as_u16(), "provider call will be retried");
                        last_err = Some(err.into());
                        continue;
                    }
                    return Err(err.into());
                }
                Err(e) => {
                    last_err = Some(PipelineError::Transport(describe(&e)).into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("provider call failed after retries")))
    }
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_is_found_through_context() {
        let err: anyhow::Error = HttpStatusError {
            status: 400,
            body: "bad".into(),
        }
        .into();
        let err = err.context("rerank");
        assert_eq!(HttpStatusError::find(&err).map(|e| e.status), Some(400));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let policy = HttpPolicy {
            transport: Transport::direct("t"),
            timeout: Duration::from_millis(300),
            max_retries: 0,
        };
        let err = policy
            .post_json("http://127.0.0.1:9/v1/chat/completions", &[], &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(PipelineError::is_transport(&err));
    }
}
