//! [`Reranker`] backed by a configured model.
//!
//! Models whose name mentions `rerank` use the dedicated rerank endpoint
//! (query capped at 512 chars, documents at 1500). A 4xx from that
//! endpoint is retried once with only the required fields. Any other model
//! is asked through a chat prompt for per-id scores.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use newsroom_core::search::{RerankDocument, RerankScore, Reranker};

use super::http::{truncate, HttpStatusError};
use super::{parse_json_lenient, prompts, AiBackend, ChatRequest};
use crate::error::PipelineError;

const MAX_QUERY_CHARS: usize = 512;
const MAX_DOC_CHARS: usize = 1500;
/// Chat fallback sends shorter documents to keep the prompt bounded.
const MAX_CHAT_DOC_CHARS: usize = 400;

pub struct ModelReranker {
    backend: Arc<dyn AiBackend>,
}

impl ModelReranker {
    pub fn new(backend: Arc<dyn AiBackend>) -> Self {
        Self { backend }
    }

    fn uses_endpoint(&self) -> bool {
        self.backend.model().to_ascii_lowercase().contains("rerank")
    }

    async fn via_endpoint(&self, query: &str, docs: &[RerankDocument]) -> Result<Vec<RerankScore>> {
        let query = truncate(query, MAX_QUERY_CHARS);
        let texts: Vec<String> = docs.iter().map(|d| truncate(&d.text, MAX_DOC_CHARS)).collect();

        let pairs = match self.backend.rerank(&query, &texts, false).await {
            Ok(p) => p,
            Err(e) if HttpStatusError::find(&e).is_some_and(|s| (400..500).contains(&s.status) && s.status != 429) => {
                tracing::debug!(error = %e, "rerank request rejected, retrying with minimal fields");
                self.backend.rerank(&query, &texts, true).await?
            }
            Err(e) => return Err(e),
        };

        Ok(pairs
            .into_iter()
            .filter_map(|(index, score)| docs.get(index).map(|d| RerankScore { id: d.id, score }))
            .collect())
    }

    async fn via_chat(&self, query: &str, docs: &[RerankDocument]) -> Result<Vec<RerankScore>> {
        let listing = docs
            .iter()
            .map(|d| format!("[id={}] {}", d.id, truncate(&d.text, MAX_CHAT_DOC_CHARS).replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n");
        let query = truncate(query, MAX_QUERY_CHARS);
        let prompt = prompts::fill(prompts::RERANK, &[("query", &query), ("documents", &listing)]);
        let reply = self
            .backend
            .chat(&ChatRequest {
                system: Some(prompts::RERANK_SYSTEM),
                prompt: &prompt,
                json_mode: true,
            })
            .await?;
        Ok(parse_chat_scores(&reply, docs)?)
    }
}

#[async_trait]
impl Reranker for ModelReranker {
    async fn rerank(&self, query: &str, docs: &[RerankDocument]) -> Result<Vec<RerankScore>> {
        if self.uses_endpoint() {
            self.via_endpoint(query, docs).await
        } else {
            self.via_chat(query, docs).await
        }
    }
}

/// Scores for known ids, clamped to `[0, 1]`. Unknown ids are dropped.
pub fn parse_chat_scores(reply: &str, docs: &[RerankDocument]) -> Result<Vec<RerankScore>, PipelineError> {
    let v = parse_json_lenient(reply)?;
    let list = v
        .get("scores")
        .and_then(Value::as_array)
        .or_else(|| v.as_array())
        .ok_or_else(|| PipelineError::ProviderResponse("no scores array".into()))?;

    Ok(list
        .iter()
        .filter_map(|item| {
            let id = match item.get("id")? {
                Value::Number(n) => n.as_i64()?,
                Value::String(s) => s.trim().parse().ok()?,
                _ => return None,
            };
            let score = match item.get("score")? {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().parse().ok()?,
                _ => return None,
            };
            docs.iter()
                .any(|d| d.id == id)
                .then_some(RerankScore { id, score: score.clamp(0.0, 1.0) })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedBackend;
    use std::sync::Mutex;

    fn docs() -> Vec<RerankDocument> {
        vec![
            RerankDocument { id: 10, text: "a".into() },
            RerankDocument { id: 20, text: "b".into() },
        ]
    }

    #[tokio::test]
    async fn test_chat_rerank() {
        let b = Arc::new(ScriptedBackend::new(vec![Ok(
            r#"{"scores":[{"id":20,"score":0.9},{"id":"10","score":"1.7"},{"id":99,"score":0.5}]}"#.into(),
        )]));
        let r = ModelReranker::new(b.clone());
        let scores = r.rerank("q", &docs()).await.unwrap();
        assert_eq!(
            scores,
            vec![RerankScore { id: 20, score: 0.9 }, RerankScore { id: 10, score: 1.0 }]
        );
        assert!(b.requests.lock().unwrap()[0].0.contains("[id=10] a"));
    }

    struct EndpointBackend {
        calls: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl AiBackend for EndpointBackend {
        fn model(&self) -> &str {
            "bge-reranker-v2-m3"
        }
        async fn chat(&self, _req: &ChatRequest<'_>) -> Result<String> {
            anyhow::bail!("chat should not be used")
        }
        async fn embed(&self, _input: &str) -> Result<Vec<f32>> {
            anyhow::bail!("unused")
        }
        async fn rerank(&self, query: &str, documents: &[String], minimal: bool) -> Result<Vec<(usize, f64)>> {
            self.calls.lock().unwrap().push(minimal);
            assert!(query.chars().count() <= MAX_QUERY_CHARS);
            assert!(documents.iter().all(|d| d.chars().count() <= MAX_DOC_CHARS));
            if !minimal {
                return Err(HttpStatusError { status: 400, body: "unknown field top_n".into() }.into());
            }
            Ok(vec![(1, 0.8), (0, 0.2), (5, 0.1)])
        }
    }

    #[tokio::test]
    async fn test_endpoint_rerank_minimal_retry_and_truncation() {
        let b = Arc::new(EndpointBackend { calls: Mutex::new(vec![]) });
        let r = ModelReranker::new(b.clone());
        let mut d = docs();
        d[0].text = "x".repeat(5000);
        let scores = r.rerank(&"q".repeat(2000), &d).await.unwrap();
        assert_eq!(
            scores,
            vec![RerankScore { id: 20, score: 0.8 }, RerankScore { id: 10, score: 0.2 }]
        );
        assert_eq!(*b.calls.lock().unwrap(), vec![false, true]);
    }
}
