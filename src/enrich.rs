//! Enrichment jobs: summary pass, embedding backfill, document translation.
//!
//! Roles are resolved from the settings row on every call. A missing
//! summary (or translation) model is a [`PipelineError::Configuration`]
//! error surfaced before any record is touched; a missing embedding model
//! only disables the vector step.

use anyhow::Result;
use serde::Serialize;

use newsroom_core::models::{ContentRecord, Enrichment};
use newsroom_core::store::{EnrichmentLogEntry, Store};

use crate::ai::embed::{self, Purpose};
use crate::ai::summarize::{plain_text, summarize};
use crate::ai::translate::{segment_html, translate_segments, Segment};
use crate::ai::{AiBackend, AiClient};
use crate::context::AppContext;
use crate::error::PipelineError;
use crate::settings::{self, ModelConfig, Role};

#[derive(Debug, Serialize)]
pub struct EnrichOutcome {
    pub id: i64,
    pub enrichment: Enrichment,
    pub embedded: bool,
}

#[derive(Debug, Serialize)]
pub struct ItemResult {
    pub id: i64,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    pub items: Vec<ItemResult>,
}

impl BatchReport {
    fn push(&mut self, id: i64, result: Result<()>) {
        match result {
            Ok(()) => {
                self.processed += 1;
                self.items.push(ItemResult {
                    id,
                    status: "success",
                    error: None,
                });
            }
            Err(e) => {
                self.failed += 1;
                self.items.push(ItemResult {
                    id,
                    status: "error",
                    error: Some(format!("{:#}", e)),
                });
            }
        }
    }
}

/// A role's model together with its backend.
pub struct Bound<'a> {
    pub model: &'a ModelConfig,
    pub backend: &'a dyn AiBackend,
}

/// Text embedded for a record: title plus summary, or snippet before the
/// summary pass.
pub fn document_text(record: &ContentRecord) -> String {
    let body = record
        .ai_summary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&record.snippet);
    format!("{}\n{}", record.title, body)
}

/// Summarize one record, log the attempt, and embed it when possible.
pub async fn enrich_one(
    store: &dyn Store,
    record: &ContentRecord,
    summary: &Bound<'_>,
    embedding: Option<&Bound<'_>>,
    summary_length: u32,
) -> Result<EnrichOutcome> {
    let content = record
        .content
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(&record.snippet);

    let result = summarize(summary.backend, &record.title, content, summary_length).await;
    let enrichment = match result {
        Ok(e) => e,
        Err(e) => {
            store
                .mark_enrich_failed(record.id, chrono::Utc::now().timestamp())
                .await?;
            store
                .append_enrichment_log(&EnrichmentLogEntry {
                    content_id: record.id,
                    provider: summary.model.provider.clone(),
                    model: summary.model.model.clone(),
                    output: format!("{:#}", e),
                    status: "error".into(),
                })
                .await?;
            return Err(e);
        }
    };

    let now = chrono::Utc::now().timestamp();
    store.save_enrichment(record.id, &enrichment, now).await?;
    store
        .append_enrichment_log(&EnrichmentLogEntry {
            content_id: record.id,
            provider: summary.model.provider.clone(),
            model: summary.model.model.clone(),
            output: serde_json::to_string(&enrichment)?,
            status: "success".into(),
        })
        .await?;

    let mut embedded = false;
    if let Some(emb) = embedding {
        let mut updated = record.clone();
        updated.ai_summary = Some(enrichment.summary.clone());
        match embed::embed(emb.backend, &document_text(&updated), Purpose::Document).await {
            Ok(vector) => {
                store.set_embedding(record.id, &vector, &emb.model.model).await?;
                embedded = true;
            }
            Err(e) => {
                tracing::warn!(id = record.id, error = %format!("{:#}", e), "embedding after enrichment failed");
            }
        }
    }

    Ok(EnrichOutcome {
        id: record.id,
        enrichment,
        embedded,
    })
}

async fn load_record(store: &dyn Store, id: i64) -> Result<ContentRecord> {
    store
        .get_record(id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("content record {}", id)).into())
}

/// Manual trigger for one record.
pub async fn enrich_record(ctx: &AppContext, id: i64, summary_length: Option<u32>) -> Result<EnrichOutcome> {
    let active = settings::active_models(&ctx.pool).await?;
    let summary_model = active.require(Role::Summary)?;
    let record = load_record(ctx.store.as_ref(), id).await?;

    let client = AiClient::new(ctx.transport.clone(), &ctx.config.ai);
    let summary_backend = client.backend_for(summary_model);
    let embedding_backend = active.embedding.as_ref().map(|m| (m, client.backend_for(m)));

    let length = summary_length
        .or(active.summary_length)
        .unwrap_or(ctx.config.ai.summary_length);
    let summary = Bound {
        model: summary_model,
        backend: summary_backend.as_ref(),
    };
    let embedding = embedding_backend.as_ref().map(|(m, b)| Bound {
        model: m,
        backend: b.as_ref(),
    });

    let outcome = enrich_one(ctx.store.as_ref(), &record, &summary, embedding.as_ref(), length).await?;
    tracing::info!(id, importance = outcome.enrichment.importance, embedded = outcome.embedded, "record enriched");
    Ok(outcome)
}

/// Enrich up to `ai.enrich_batch_size` unprocessed records, newest first.
/// When anything was processed, an embedding backfill is spawned and not
/// awaited.
pub async fn enrich_backlog(ctx: &AppContext) -> Result<BatchReport> {
    let active = settings::active_models(&ctx.pool).await?;
    let summary_model = active.require(Role::Summary)?;

    let client = AiClient::new(ctx.transport.clone(), &ctx.config.ai);
    let summary_backend = client.backend_for(summary_model);
    let summary = Bound {
        model: summary_model,
        backend: summary_backend.as_ref(),
    };
    let length = active.summary_length.unwrap_or(ctx.config.ai.summary_length);

    let backlog = ctx
        .store
        .enrichment_backlog(ctx.config.ai.enrich_batch_size, ctx.config.ai.max_enrich_attempts)
        .await?;
    let mut report = BatchReport::default();
    for record in &backlog {
        // Vectors come from the backfill below.
        let result = enrich_one(ctx.store.as_ref(), record, &summary, None, length)
            .await
            .map(|_| ());
        if let Err(ref e) = result {
            tracing::warn!(id = record.id, error = %format!("{:#}", e), "enrichment failed");
        }
        report.push(record.id, result);
    }
    tracing::info!(processed = report.processed, failed = report.failed, "enrichment backlog run");

    if report.processed > 0 && active.embedding.is_some() {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            match embedding_backfill(&ctx).await {
                Ok(r) => tracing::info!(embedded = r.processed, failed = r.failed, "embedding backfill finished"),
                Err(e) => tracing::error!(error = %format!("{:#}", e), "embedding backfill failed"),
            }
        });
    }
    Ok(report)
}

/// Embed processed records that have no vector yet.
pub async fn embedding_backfill(ctx: &AppContext) -> Result<BatchReport> {
    let active = settings::active_models(&ctx.pool).await?;
    let model = active.require(Role::Embedding)?;
    let backend = AiClient::new(ctx.transport.clone(), &ctx.config.ai).backend_for(model);
    let bound = Bound {
        model,
        backend: backend.as_ref(),
    };
    backfill_with(ctx.store.as_ref(), &bound, ctx.config.ai.backfill_batch_size).await
}

pub async fn backfill_with(store: &dyn Store, embedding: &Bound<'_>, limit: i64) -> Result<BatchReport> {
    let pending = store.embedding_backlog(limit).await?;
    let mut report = BatchReport::default();
    for record in &pending {
        let result = async {
            let vector = embed::embed(embedding.backend, &document_text(record), Purpose::Document).await?;
            store.set_embedding(record.id, &vector, &embedding.model.model).await
        }
        .await;
        if let Err(ref e) = result {
            tracing::warn!(id = record.id, error = %format!("{:#}", e), "embedding failed");
        }
        report.push(record.id, result);
    }
    Ok(report)
}

#[derive(Debug, Serialize)]
pub struct TranslationResult {
    pub id: i64,
    pub language: String,
    pub segments: Vec<Segment>,
}

/// Structured translation of a record's content, stored on the record.
pub async fn translate_record(ctx: &AppContext, id: i64, language: Option<&str>) -> Result<TranslationResult> {
    let active = settings::active_models(&ctx.pool).await?;
    let model = active.document_translator()?;
    let record = load_record(ctx.store.as_ref(), id).await?;
    let backend = AiClient::new(ctx.transport.clone(), &ctx.config.ai).backend_for(model);
    let language = language.unwrap_or(&ctx.config.ai.target_language);

    translate_with(
        ctx.store.as_ref(),
        &record,
        backend.as_ref(),
        language,
        ctx.config.ai.translate_batch_size,
    )
    .await
}

pub async fn translate_with(
    store: &dyn Store,
    record: &ContentRecord,
    backend: &dyn AiBackend,
    language: &str,
    batch_size: usize,
) -> Result<TranslationResult> {
    let html = match record.content.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(c) => c.to_string(),
        None => format!("<p>{}</p>", html_escape::encode_text(&plain_text(&record.snippet, 2000))),
    };
    let mut segments = segment_html(&html);
    translate_segments(backend, &mut segments, language, batch_size).await?;
    store
        .save_translation(record.id, language, &serde_json::to_value(&segments)?)
        .await?;
    tracing::info!(id = record.id, language, segments = segments.len(), "record translated");
    Ok(TranslationResult {
        id: record.id,
        language: language.to_string(),
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedBackend;
    use crate::settings::Role;
    use newsroom_core::models::{CrawlStatus, Sentiment};
    use newsroom_core::store::memory::InMemoryStore;

    fn model(role: Role) -> ModelConfig {
        ModelConfig {
            id: 1,
            name: "m".into(),
            provider: "openai".into(),
            role,
            base_url: None,
            api_key: None,
            model: "gpt-test".into(),
            temperature: None,
            enabled: true,
        }
    }

    fn record() -> ContentRecord {
        ContentRecord {
            id: 0,
            raw_entry_id: None,
            source_id: None,
            source_name: None,
            title: "Rates cut".into(),
            url: "https://n.test/1".into(),
            snippet: "The central bank cut rates.".into(),
            content: Some("<p>The central bank cut rates.</p>".into()),
            category: None,
            ai_category: None,
            ai_summary: None,
            ai_processed: false,
            sentiment: None,
            importance: None,
            highlight: false,
            tags: vec![],
            published_at: Some(1),
            crawled_at: None,
            crawl_status: CrawlStatus::Pending,
            updated_at: 1,
            embedding: None,
        }
    }

    const REPLY: &str = r#"{"summary":"Bank cut rates.","sentiment":"positive","importance":7,"highlight":false,"category":"Business"}"#;

    #[tokio::test]
    async fn test_enrich_one_saves_logs_and_embeds() {
        let store = InMemoryStore::new();
        let id = store.insert_record(record()).unwrap();
        let rec = store.get_record(id).await.unwrap().unwrap();

        let sm = model(Role::Summary);
        let em = model(Role::Embedding);
        let sb = ScriptedBackend::new(vec![Ok(REPLY.into())]);
        let eb = ScriptedBackend::new(vec![]);

        let out = enrich_one(
            &store,
            &rec,
            &Bound { model: &sm, backend: &sb },
            Some(&Bound { model: &em, backend: &eb }),
            5,
        )
        .await
        .unwrap();
        assert!(out.embedded);

        let saved = store.get_record(id).await.unwrap().unwrap();
        assert!(saved.ai_processed);
        assert_eq!(saved.sentiment, Some(Sentiment::Positive));
        assert_eq!(saved.ai_category.as_deref(), Some("Business"));
        assert!(saved.embedding.is_some());
        assert_eq!(eb.embedded.lock().unwrap()[0], "Rates cut\nBank cut rates.");

        let log = store.log_entries().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, "success");
    }

    #[tokio::test]
    async fn test_failed_summary_is_logged_and_surfaced() {
        let store = InMemoryStore::new();
        let id = store.insert_record(record()).unwrap();
        let rec = store.get_record(id).await.unwrap().unwrap();
        let sm = model(Role::Summary);
        let sb = ScriptedBackend::new(vec![Ok("nope".into()), Ok("nope".into())]);

        let err = enrich_one(&store, &rec, &Bound { model: &sm, backend: &sb }, None, 5)
            .await
            .unwrap_err();
        assert!(matches!(PipelineError::classify(&err), Some(PipelineError::ProviderResponse(_))));

        let log = store.log_entries().unwrap();
        assert_eq!(log[0].status, "error");
        assert!(!store.get_record(id).await.unwrap().unwrap().ai_processed);
    }

    #[tokio::test]
    async fn test_repeatedly_failing_record_leaves_backlog() {
        let store = InMemoryStore::new();
        let failing = store.insert_record(record()).unwrap();
        let mut older = record();
        older.published_at = Some(0);
        let older = store.insert_record(older).unwrap();

        let sm = model(Role::Summary);
        let rec = store.get_record(failing).await.unwrap().unwrap();
        for attempt in 1..=3 {
            let backlog = store.enrichment_backlog(1, 3).await.unwrap();
            assert_eq!(backlog[0].id, failing, "attempt {}", attempt);
            let sb = ScriptedBackend::new(vec![Ok("nope".into()), Ok("nope".into())]);
            assert!(enrich_one(&store, &rec, &Bound { model: &sm, backend: &sb }, None, 5)
                .await
                .is_err());
        }

        let backlog = store.enrichment_backlog(1, 3).await.unwrap();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, older);
    }

    #[tokio::test]
    async fn test_translate_with_stores_segments() {
        let store = InMemoryStore::new();
        let id = store.insert_record(record()).unwrap();
        let rec = store.get_record(id).await.unwrap().unwrap();
        let b = ScriptedBackend::new(vec![Ok(r#"{"segments":[{"id":0,"translation":"Der Zins"}]}"#.into())]);

        let out = translate_with(&store, &rec, &b, "German", 20).await.unwrap();
        assert_eq!(out.segments[0].translation.as_deref(), Some("Der Zins"));
        let (lang, data) = store.translation(id).unwrap().unwrap();
        assert_eq!(lang, "German");
        assert_eq!(data[0]["translation"], "Der Zins");
    }
}
