//! Plain and structured translation.
//!
//! Structured translation splits an article's HTML into ordered segments,
//! sends the text of each segment in id-tagged batches, and requires every
//! id back. A batch that comes back incomplete or unparsable is retried on
//! its own, once, before the whole call fails.

use std::collections::HashMap;

use anyhow::Result;
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{parse_json_lenient, prompts, AiBackend, ChatRequest};
use crate::error::PipelineError;

/// Tags whose children become segments of their own.
const FLATTEN: &[&str] = &[
    "html", "body", "div", "section", "article", "main", "header", "footer", "ul", "ol", "aside",
    "nav",
];

/// Segments kept for layout but never sent for translation.
const UNTRANSLATED: &[&str] = &["script", "style", "img", "video", "iframe", "br", "hr", "figure"];

pub async fn translate(backend: &dyn AiBackend, text: &str, language: &str) -> Result<String> {
    let prompt = prompts::fill(prompts::TRANSLATE, &[("language", language), ("text", text)]);
    let reply = backend
        .chat(&ChatRequest {
            system: Some(prompts::TRANSLATE_SYSTEM),
            prompt: &prompt,
            json_mode: false,
        })
        .await?;
    let out = reply.trim();
    if out.is_empty() {
        return Err(PipelineError::ProviderResponse("empty translation".into()).into());
    }
    Ok(out.to_string())
}

/// One block of an article with its translation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub id: usize,
    pub tag: String,
    pub html: String,
    pub text: String,
    pub translation: Option<String>,
}

impl Segment {
    fn translatable(&self) -> bool {
        !self.text.is_empty() && !UNTRANSLATED.contains(&self.tag.as_str())
    }
}

/// Split article HTML into ordered block segments.
pub fn segment_html(html: &str) -> Vec<Segment> {
    let doc = Html::parse_fragment(html);
    let mut segments = Vec::new();
    collect_segments(doc.root_element(), &mut segments);
    segments
}

fn collect_segments(parent: ElementRef, out: &mut Vec<Segment>) {
    for child in parent.children() {
        match child.value() {
            Node::Text(t) => {
                let text = t.trim();
                if !text.is_empty() {
                    out.push(Segment {
                        id: out.len(),
                        tag: "p".into(),
                        html: format!("<p>{}</p>", html_escape::encode_text(text)),
                        text: text.to_string(),
                        translation: None,
                    });
                }
            }
            Node::Element(_) => {
                let Some(el) = ElementRef::wrap(child) else { continue };
                let tag = el.value().name().to_ascii_lowercase();
                if FLATTEN.contains(&tag.as_str()) {
                    collect_segments(el, out);
                    continue;
                }
                let text = el
                    .text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                out.push(Segment {
                    id: out.len(),
                    tag,
                    html: el.html(),
                    text,
                    translation: None,
                });
            }
            _ => {}
        }
    }
}

/// Translate every translatable segment in place.
pub async fn translate_segments(
    backend: &dyn AiBackend,
    segments: &mut [Segment],
    language: &str,
    batch_size: usize,
) -> Result<()> {
    let items: Vec<(usize, String)> = segments
        .iter()
        .filter(|s| s.translatable())
        .map(|s| (s.id, s.text.clone()))
        .collect();
    let translated = structured_translate(backend, &items, language, batch_size).await?;
    for seg in segments.iter_mut() {
        if let Some(t) = translated.get(&seg.id) {
            seg.translation = Some(t.clone());
        }
    }
    Ok(())
}

/// Translate `(id, text)` pairs in batches; every id must come back.
pub async fn structured_translate(
    backend: &dyn AiBackend,
    items: &[(usize, String)],
    language: &str,
    batch_size: usize,
) -> Result<HashMap<usize, String>> {
    let mut out = HashMap::new();
    for (n, batch) in items.chunks(batch_size.max(1)).enumerate() {
        let result = match translate_batch(backend, batch, language, true).await {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(batch = n, error = %format!("{:#}", e), "translation batch failed, retrying it");
                translate_batch(backend, batch, language, false).await?
            }
        };
        out.extend(result);
    }
    Ok(out)
}

async fn translate_batch(
    backend: &dyn AiBackend,
    batch: &[(usize, String)],
    language: &str,
    json_mode: bool,
) -> Result<HashMap<usize, String>> {
    let input: Vec<Value> = batch
        .iter()
        .map(|(id, text)| json!({ "id": id, "text": text }))
        .collect();
    let input = serde_json::to_string_pretty(&input)?;
    let prompt = prompts::fill(
        prompts::STRUCTURED_TRANSLATE,
        &[("language", language), ("segments", &input)],
    );
    let reply = backend
        .chat(&ChatRequest {
            system: Some(prompts::TRANSLATE_SYSTEM),
            prompt: &prompt,
            json_mode,
        })
        .await?;
    Ok(parse_batch(&reply, batch)?)
}

fn parse_batch(reply: &str, batch: &[(usize, String)]) -> Result<HashMap<usize, String>, PipelineError> {
    let v = parse_json_lenient(reply)?;
    let list = v
        .get("segments")
        .and_then(Value::as_array)
        .or_else(|| v.as_array())
        .ok_or_else(|| PipelineError::ProviderResponse("no segments array".into()))?;

    let mut map = HashMap::new();
    for item in list {
        let id = match item.get("id") {
            Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        let text = item
            .get("translation")
            .or_else(|| item.get("text"))
            .and_then(Value::as_str);
        if let (Some(id), Some(text)) = (id, text) {
            map.insert(id, text.to_string());
        }
    }

    let missing: Vec<usize> = batch
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| !map.contains_key(id))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::ProviderResponse(format!(
            "translation omitted segment ids {:?}",
            missing
        )));
    }
    map.retain(|id, _| batch.iter().any(|(b, _)| b == id));
    Ok(map)
}
