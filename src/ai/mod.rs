//! AI provider layer.
//!
//! Every logical operation (chat, embed, rerank) goes through the
//! [`AiBackend`] trait. Which request/response shape is used is decided by
//! [`Provider::of`] from the model configuration alone:
//!
//! | Provider field | Variant | Chat | Embed |
//! |----------------|---------|------|-------|
//! | `gemini`, `google` | [`Provider::NativeMultimodal`] | `models/{m}:generateContent` | `models/{m}:embedContent` |
//! | anything else | [`Provider::OpenAiCompatible`] | `/chat/completions` | `/embeddings` |
//!
//! The operations built on top live in [`summarize`], [`embed`],
//! [`translate`] and [`rerank`].

pub mod embed;
pub mod gemini;
pub mod http;
pub mod openai;
pub mod prompts;
pub mod rerank;
pub mod summarize;
pub mod translate;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::AiConfig;
use crate::error::PipelineError;
use crate::settings::ModelConfig;
use crate::transport::Transport;

use self::http::HttpPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    NativeMultimodal,
    OpenAiCompatible,
}

impl Provider {
    pub fn of(model: &ModelConfig) -> Self {
        match model.provider.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Provider::NativeMultimodal,
            _ => Provider::OpenAiCompatible,
        }
    }
}

/// One chat-style completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    /// Ask the provider for a JSON-only response.
    pub json_mode: bool,
}

/// Provider-specific request/response shape for one model.
#[async_trait]
pub trait AiBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, req: &ChatRequest<'_>) -> Result<String>;

    async fn embed(&self, input: &str) -> Result<Vec<f32>>;

    /// Dedicated rerank endpoint. Returns `(document index, score)` pairs.
    /// `minimal` drops every optional request field.
    async fn rerank(&self, _query: &str, _documents: &[String], _minimal: bool) -> Result<Vec<(usize, f64)>> {
        bail!("model {} has no rerank endpoint", self.model())
    }
}

/// Shared settings for constructing backends.
#[derive(Clone)]
pub struct AiClient {
    policy: HttpPolicy,
}

impl AiClient {
    pub fn new(transport: Transport, config: &AiConfig) -> Self {
        Self {
            policy: HttpPolicy {
                transport,
                timeout: Duration::from_secs(config.timeout_secs),
                max_retries: config.max_retries,
            },
        }
    }

    /// Pure routing from model configuration to backend.
    pub fn backend_for(&self, model: &ModelConfig) -> Arc<dyn AiBackend> {
        match Provider::of(model) {
            Provider::NativeMultimodal => Arc::new(gemini::GeminiBackend::new(model, self.policy.clone())),
            Provider::OpenAiCompatible => Arc::new(openai::OpenAiBackend::new(model, self.policy.clone())),
        }
    }
}

/// Parse a JSON object out of model output: code fences and surrounding
/// prose are tolerated.
pub fn parse_json_lenient(text: &str) -> Result<serde_json::Value, PipelineError> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if v.is_object() || v.is_array() {
            return Ok(v);
        }
    }

    let unfenced = strip_fences(trimmed);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(unfenced) {
        if v.is_object() || v.is_array() {
            return Ok(v);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (unfenced.find(open), unfenced.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(&unfenced[start..=end]) {
                    return Ok(v);
                }
            }
        }
    }

    Err(PipelineError::ProviderResponse(format!(
        "no JSON object in model output: {}",
        http::truncate(trimmed, 200)
    )))
}

fn strip_fences(s: &str) -> &str {
    let s = s.trim();
    let Some(rest) = s.strip_prefix("```") else { return s };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Characters outside the Latin, digit and punctuation ranges mean the
/// query benefits from a translated second embedding.
pub fn has_non_latin(s: &str) -> bool {
    s.chars()
        .filter(|c| c.is_alphabetic())
        .any(|c| (c as u32) > 0x024F)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays queued chat replies and records requests.
    pub struct ScriptedBackend {
        pub replies: Mutex<VecDeque<Result<String>>>,
        pub requests: Mutex<Vec<(String, bool)>>,
        pub embedding: Vec<f32>,
        pub embedded: Mutex<Vec<String>>,
        pub model: String,
    }

    impl ScriptedBackend {
        pub fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                embedding: vec![1.0, 0.0],
                embedded: Mutex::new(Vec::new()),
                model: "scripted".into(),
            }
        }
    }

    #[async_trait]
    impl AiBackend for ScriptedBackend {
        fn model(&self) -> &str {
            &self.model
        }

        async fn chat(&self, req: &ChatRequest<'_>) -> Result<String> {
            self.requests
                .lock()
                .unwrap()
                .push((req.prompt.to_string(), req.json_mode));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted reply left")))
        }

        async fn embed(&self, input: &str) -> Result<Vec<f32>> {
            self.embedded.lock().unwrap().push(input.to_string());
            Ok(self.embedding.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Role;

    fn model(provider: &str) -> ModelConfig {
        ModelConfig {
            id: 1,
            name: "m".into(),
            provider: provider.into(),
            role: Role::Summary,
            base_url: None,
            api_key: None,
            model: "x".into(),
            temperature: None,
            enabled: true,
        }
    }

    #[test]
    fn test_provider_routing_is_pure() {
        assert_eq!(Provider::of(&model("google")), Provider::NativeMultimodal);
        assert_eq!(Provider::of(&model("Gemini")), Provider::NativeMultimodal);
        assert_eq!(Provider::of(&model("openai")), Provider::OpenAiCompatible);
        assert_eq!(Provider::of(&model("deepseek")), Provider::OpenAiCompatible);
    }

    #[test]
    fn test_parse_json_lenient() {
        let v = parse_json_lenient("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v["a"], 1);
        let v = parse_json_lenient("Sure! Here it is: {\"a\": 2} Hope that helps.").unwrap();
        assert_eq!(v["a"], 2);
        assert!(parse_json_lenient("no json here").is_err());
    }

    #[test]
    fn test_non_latin_detection() {
        assert!(has_non_latin("人工智能"));
        assert!(has_non_latin("новости"));
        assert!(!has_non_latin("café AI 2025"));
    }
}
