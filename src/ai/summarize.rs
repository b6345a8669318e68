//! Summary + sentiment + importance + highlight + category in one call.
//!
//! The first request asks for structured JSON output. If the provider
//! rejects that mode (HTTP 4xx) or the reply does not parse, one relaxed
//! request without the structured-output flag is made and its reply is
//! parsed leniently. A second failure is
//! [`PipelineError::ProviderResponse`].

use anyhow::Result;
use serde_json::Value;

use newsroom_core::models::{Enrichment, Sentiment};

use super::http::HttpStatusError;
use super::{parse_json_lenient, prompts, AiBackend, ChatRequest};
use crate::error::PipelineError;

/// Article text sent to the model is capped at this many characters.
const MAX_CONTENT_CHARS: usize = 8000;

pub async fn summarize(
    backend: &dyn AiBackend,
    title: &str,
    content: &str,
    summary_length: u32,
) -> Result<Enrichment> {
    let length = summary_length.to_string();
    let text = plain_text(content, MAX_CONTENT_CHARS);
    let prompt = prompts::fill(
        prompts::SUMMARY,
        &[("summary_length", &length), ("title", title), ("content", &text)],
    );

    let strict = ChatRequest {
        system: Some(prompts::SUMMARY_SYSTEM),
        prompt: &prompt,
        json_mode: true,
    };
    match backend.chat(&strict).await {
        Ok(reply) => match parse_enrichment(&reply) {
            Ok(e) => return Ok(e),
            Err(e) => {
                tracing::warn!(model = backend.model(), error = %e, "structured summary unparsable, retrying relaxed");
            }
        },
        Err(e) if is_rejection(&e) => {
            tracing::warn!(model = backend.model(), error = %format!("{:#}", e), "structured output rejected, retrying relaxed");
        }
        Err(e) => return Err(e),
    }

    let relaxed = ChatRequest {
        json_mode: false,
        ..strict
    };
    let reply = backend.chat(&relaxed).await?;
    Ok(parse_enrichment(&reply)?)
}

fn is_rejection(err: &anyhow::Error) -> bool {
    if let Some(status) = HttpStatusError::find(err) {
        return (400..500).contains(&status.status) && status.status != 429;
    }
    matches!(PipelineError::classify(err), Some(PipelineError::ProviderResponse(_)))
}

/// Validate and normalise a model reply.
pub fn parse_enrichment(reply: &str) -> Result<Enrichment, PipelineError> {
    let v = parse_json_lenient(reply)?;
    let summary = v
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::ProviderResponse("missing summary".into()))?
        .to_string();

    let sentiment = v
        .get("sentiment")
        .and_then(Value::as_str)
        .map(Sentiment::parse_lenient)
        .unwrap_or(Sentiment::Neutral);

    let importance = match v.get("importance") {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.round() as i64),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
    .unwrap_or(5)
    .clamp(1, 10);

    let highlight = match v.get("highlight") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    };

    let category = v
        .get("category")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(Enrichment {
        summary,
        sentiment,
        importance,
        highlight,
        category,
    })
}

/// Visible text of an HTML (or plain) string, whitespace collapsed and capped.
pub fn plain_text(content: &str, max_chars: usize) -> String {
    let fragment = scraper::Html::parse_fragment(content);
    let text = fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedBackend;

    const GOOD: &str = r#"{"summary":"S.","sentiment":"negative","importance":8,"highlight":true,"category":"Science"}"#;

    #[tokio::test]
    async fn test_strict_success() {
        let b = ScriptedBackend::new(vec![Ok(GOOD.into())]);
        let e = summarize(&b, "T", "<p>body</p>", 3).await.unwrap();
        assert_eq!(e.summary, "S.");
        assert_eq!(e.sentiment, Sentiment::Negative);
        assert_eq!(e.importance, 8);
        assert!(e.highlight);
        assert_eq!(e.category.as_deref(), Some("Science"));

        let requests = b.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].1);
        assert!(requests[0].0.contains("about 3 sentences"));
        assert!(requests[0].0.contains("Content: body"));
    }

    #[tokio::test]
    async fn test_rejected_json_mode_retries_relaxed() {
        let rejection = HttpStatusError {
            status: 400,
            body: "response_format not supported".into(),
        };
        let b = ScriptedBackend::new(vec![
            Err(rejection.into()),
            Ok(format!("Here you go:\n```json\n{}\n```", GOOD)),
        ]);
        let e = summarize(&b, "T", "c", 5).await.unwrap();
        assert_eq!(e.importance, 8);

        let requests = b.requests.lock().unwrap();
        assert_eq!(requests.iter().map(|r| r.1).collect::<Vec<_>>(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_unparsable_twice_is_invalid_response() {
        let b = ScriptedBackend::new(vec![Ok("not json".into()), Ok("still not json".into())]);
        let err = summarize(&b, "T", "c", 5).await.unwrap_err();
        assert!(matches!(
            PipelineError::classify(&err),
            Some(PipelineError::ProviderResponse(_))
        ));
        assert!(err.to_string().starts_with("InvalidAiResponse"));
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried_relaxed() {
        let b = ScriptedBackend::new(vec![Err(PipelineError::Transport("down".into()).into())]);
        let err = summarize(&b, "T", "c", 5).await.unwrap_err();
        assert!(PipelineError::is_transport(&err));
        assert_eq!(b.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_lenient_field_normalisation() {
        let e = parse_enrichment(r#"{"summary":" x ","importance":"14","highlight":"true","sentiment":"Positive"}"#)
            .unwrap();
        assert_eq!(e.summary, "x");
        assert_eq!(e.importance, 10);
        assert!(e.highlight);
        assert_eq!(e.sentiment, Sentiment::Positive);
        assert!(e.category.is_none());

        assert!(parse_enrichment(r#"{"sentiment":"neutral"}"#).is_err());
    }
}
