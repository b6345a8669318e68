//! OpenAI-compatible shape: `/chat/completions`, `/embeddings`, `/rerank`.
//!
//! Covers OpenAI, DeepSeek, Ollama's `/v1`, vLLM, and any other server
//! speaking the same protocol.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::HttpPolicy;
use super::{AiBackend, ChatRequest};
use crate::error::PipelineError;
use crate::settings::ModelConfig;

pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f64>,
    policy: HttpPolicy,
}

fn default_base_url(provider: &str) -> &'static str {
    match provider.to_ascii_lowercase().as_str() {
        "deepseek" => "https://api.deepseek.com",
        "ollama" => "http://localhost:11434/v1",
        _ => "https://api.openai.com/v1",
    }
}

impl OpenAiBackend {
    pub fn new(model: &ModelConfig, policy: HttpPolicy) -> Self {
        let base_url = model
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| default_base_url(&model.provider).to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: model.api_key.clone().filter(|k| !k.is_empty()),
            model: model.model.clone(),
            temperature: model.temperature,
            policy,
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match self.api_key {
            Some(ref key) => vec![("Authorization", format!("Bearer {}", key))],
            None => Vec::new(),
        }
    }

    pub fn chat_body(&self, req: &ChatRequest<'_>) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.prompt }));

        let mut body = json!({ "model": self.model, "messages": messages });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if req.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl AiBackend for OpenAiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: &ChatRequest<'_>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self.policy.post_json(&url, &self.headers(), &self.chat_body(req)).await?;
        parse_chat(&resp)
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": [input] });
        let resp = self.policy.post_json(&url, &self.headers(), &body).await?;
        parse_embedding(&resp)
    }

    async fn rerank(&self, query: &str, documents: &[String], minimal: bool) -> Result<Vec<(usize, f64)>> {
        let url = format!("{}/rerank", self.base_url);
        let body = if minimal {
            json!({ "model": self.model, "query": query, "documents": documents })
        } else {
            json!({
                "model": self.model,
                "query": query,
                "documents": documents,
                "top_n": documents.len(),
                "return_documents": false,
            })
        };
        let resp = self.policy.post_json(&url, &self.headers(), &body).await?;
        parse_rerank(&resp)
    }
}

pub fn parse_chat(resp: &Value) -> Result<String> {
    resp.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| PipelineError::ProviderResponse("missing choices[0].message.content".into()).into())
}

pub fn parse_embedding(resp: &Value) -> Result<Vec<f32>> {
    let values = resp
        .pointer("/data/0/embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| PipelineError::ProviderResponse("missing data[0].embedding".into()))?;
    Ok(values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

/// Accepts `results` (Jina / Cohere / vLLM) or `data` arrays of
/// `{index, relevance_score | score}`.
pub fn parse_rerank(resp: &Value) -> Result<Vec<(usize, f64)>> {
    let items = resp
        .get("results")
        .or_else(|| resp.get("data"))
        .and_then(|r| r.as_array())
        .ok_or_else(|| PipelineError::ProviderResponse("rerank response has no results".into()))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let index = item.get("index")?.as_u64()? as usize;
            let score = item
                .get("relevance_score")
                .or_else(|| item.get("score"))?
                .as_f64()?;
            Some((index, score))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Role;
    use crate::transport::Transport;
    use std::time::Duration;

    fn backend(provider: &str, base_url: Option<&str>) -> OpenAiBackend {
        let model = ModelConfig {
            id: 1,
            name: "m".into(),
            provider: provider.into(),
            role: Role::Summary,
            base_url: base_url.map(str::to_string),
            api_key: Some("k".into()),
            model: "gpt-4o-mini".into(),
            temperature: Some(0.2),
            enabled: true,
        };
        OpenAiBackend::new(
            &model,
            HttpPolicy {
                transport: Transport::direct("t"),
                timeout: Duration::from_secs(1),
                max_retries: 0,
            },
        )
    }

    #[test]
    fn test_base_url_defaults() {
        assert_eq!(backend("openai", None).base_url, "https://api.openai.com/v1");
        assert_eq!(backend("deepseek", None).base_url, "https://api.deepseek.com");
        assert_eq!(backend("openai", Some("http://h/v1/")).base_url, "http://h/v1");
    }

    #[test]
    fn test_chat_body_json_mode() {
        let b = backend("openai", None);
        let req = ChatRequest {
            system: Some("sys"),
            prompt: "hi",
            json_mode: true,
        };
        let body = b.chat_body(&req);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["temperature"], 0.2);

        let relaxed = b.chat_body(&ChatRequest { json_mode: false, ..req });
        assert!(relaxed.get("response_format").is_none());
    }

    #[test]
    fn test_parse_responses() {
        let chat = json!({ "choices": [{ "message": { "content": "hello" } }] });
        assert_eq!(parse_chat(&chat).unwrap(), "hello");

        let emb = json!({ "data": [{ "embedding": [0.5, 0.25] }] });
        assert_eq!(parse_embedding(&emb).unwrap(), vec![0.5, 0.25]);

        let rr = json!({ "results": [{ "index": 1, "relevance_score": 0.9 }, { "index": 0, "score": 0.1 }] });
        assert_eq!(parse_rerank(&rr).unwrap(), vec![(1, 0.9), (0, 0.1)]);

        assert!(parse_chat(&json!({})).is_err());
    }
}
