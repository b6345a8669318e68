//! Native Gemini shape (`generativelanguage.googleapis.com/v1beta`).

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::HttpPolicy;
use super::{AiBackend, ChatRequest};
use crate::error::PipelineError;
use crate::settings::ModelConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiBackend {
    base_url: String,
    api_key: Option<String>,
    /// Without the `models/` prefix.
    model: String,
    temperature: Option<f64>,
    policy: HttpPolicy,
}

impl GeminiBackend {
    pub fn new(model: &ModelConfig, policy: HttpPolicy) -> Self {
        let base_url = model
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: model.api_key.clone().filter(|k| !k.is_empty()),
            model: model.model.trim_start_matches("models/").to_string(),
            temperature: model.temperature,
            policy,
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match self.api_key {
            Some(ref key) => vec![("x-goog-api-key", key.clone())],
            None => Vec::new(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    pub fn chat_body(&self, req: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": req.prompt }] }],
        });
        if let Some(system) = req.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        let mut generation = serde_json::Map::new();
        if let Some(t) = self.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if req.json_mode {
            generation.insert("responseMimeType".into(), json!("application/json"));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }
}

#[async_trait]
impl AiBackend for GeminiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: &ChatRequest<'_>) -> Result<String> {
        let resp = self
            .policy
            .post_json(&self.endpoint("generateContent"), &self.headers(), &self.chat_body(req))
            .await?;
        parse_chat(&resp)
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": input }] },
        });
        let resp = self
            .policy
            .post_json(&self.endpoint("embedContent"), &self.headers(), &body)
            .await?;
        parse_embedding(&resp)
    }
}

/// Concatenated text of the first candidate's parts.
pub fn parse_chat(resp: &Value) -> Result<String> {
    let parts = resp
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = resp
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            PipelineError::ProviderResponse(format!("gemini returned no content ({})", reason))
        })?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err(PipelineError::ProviderResponse("gemini returned empty text".into()).into());
    }
    Ok(text)
}

pub fn parse_embedding(resp: &Value) -> Result<Vec<f32>> {
    let values = resp
        .pointer("/embedding/values")
        .and_then(|v| v.as_array())
        .ok_or_else(|| PipelineError::ProviderResponse("missing embedding.values".into()))?;
    Ok(values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Role;
    use crate::transport::Transport;
    use std::time::Duration;

    fn backend() -> GeminiBackend {
        let model = ModelConfig {
            id: 1,
            name: "g".into(),
            provider: "google".into(),
            role: Role::Summary,
            base_url: None,
            api_key: Some("k".into()),
            model: "models/gemini-1.5-flash".into(),
            temperature: None,
            enabled: true,
        };
        GeminiBackend::new(
            &model,
            HttpPolicy {
                transport: Transport::direct("t"),
                timeout: Duration::from_secs(1),
                max_retries: 0,
            },
        )
    }

    #[test]
    fn test_endpoint_strips_models_prefix() {
        assert_eq!(
            backend().endpoint("generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_json_mode_uses_response_mime_type() {
        let b = backend();
        let body = b.chat_body(&ChatRequest {
            system: None,
            prompt: "p",
            json_mode: true,
        });
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        let body = b.chat_body(&ChatRequest {
            system: None,
            prompt: "p",
            json_mode: false,
        });
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_parse_responses() {
        let resp = json!({ "candidates": [{ "content": { "parts": [{ "text": "a" }, { "text": "b" }] } }] });
        assert_eq!(parse_chat(&resp).unwrap(), "ab");
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(parse_chat(&blocked).unwrap_err().to_string().contains("SAFETY"));
        let emb = json!({ "embedding": { "values": [1.0, 2.0] } });
        assert_eq!(parse_embedding(&emb).unwrap(), vec![1.0, 2.0]);
    }
}
