//! Search entry point: resolves models, embeds the query, and runs core
//! retrieval.
//!
//! A query with an embedding model takes the semantic path. Non-Latin
//! queries are also machine-translated into `ai.target_language` and
//! embedded a second time; each record then scores the better of the two
//! similarities. Without an embedding model, or when embedding fails, the
//! query degrades to a case-insensitive text filter over title and
//! snippet, and `degraded` is set on the response.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use newsroom_core::embedding::QueryVectors;
use newsroom_core::models::{ContentFilter, ContentRecord};
use newsroom_core::search::{retrieve, RetrievalPage, RetrievalParams, RetrievalRequest, Reranker, SemanticQuery};
use newsroom_core::store::Store;

use crate::ai::embed::{self, Purpose};
use crate::ai::rerank::ModelReranker;
use crate::ai::translate::translate;
use crate::ai::{has_non_latin, AiBackend, AiClient};
use crate::config::RetrievalConfig;
use crate::context::AppContext;
use crate::settings;

/// Query parameters shared by the CLI and `GET /api/content`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
    pub ai_category: Option<String>,
    #[serde(default)]
    pub bookmarked: bool,
    /// Unix seconds.
    pub since: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl SearchParams {
    fn query(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    fn filter(&self) -> ContentFilter {
        ContentFilter {
            source: self.source.clone(),
            category: self.category.clone(),
            ai_category: self.ai_category.clone(),
            bookmarked_only: self.bookmarked,
            text: None,
            published_after: self.since,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub page: i64,
    pub page_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Semantic search was asked for but ran as a text filter.
    pub degraded: bool,
    #[serde(flatten)]
    pub result: RetrievalPage,
}

/// Models available to one search call.
#[derive(Default)]
pub struct SearchModels<'a> {
    pub embedding: Option<&'a dyn AiBackend>,
    pub translation: Option<&'a dyn AiBackend>,
    pub reranker: Option<&'a dyn Reranker>,
}

pub async fn search(ctx: &AppContext, params: &SearchParams, viewer: Option<&str>) -> Result<SearchResponse> {
    let active = settings::active_models(&ctx.pool).await?;
    let client = AiClient::new(ctx.transport.clone(), &ctx.config.ai);

    let embedding = active.embedding.as_ref().map(|m| client.backend_for(m));
    let translation = active.translation.as_ref().map(|m| client.backend_for(m));
    let reranker: Option<ModelReranker> = active
        .rerank
        .as_ref()
        .map(|m| ModelReranker::new(client.backend_for(m)));

    let models = SearchModels {
        embedding: embedding.as_deref(),
        translation: translation.as_deref(),
        reranker: reranker.as_ref().map(|r| r as &dyn Reranker),
    };
    let threshold = active
        .relevance_threshold
        .unwrap_or(ctx.config.retrieval.default_threshold);

    search_with(
        ctx.store.as_ref(),
        &models,
        params,
        viewer,
        &ctx.config.retrieval,
        threshold,
        &ctx.config.ai.target_language,
    )
    .await
}

pub async fn search_with(
    store: &dyn Store,
    models: &SearchModels<'_>,
    params: &SearchParams,
    viewer: Option<&str>,
    retrieval: &RetrievalConfig,
    threshold: f64,
    target_language: &str,
) -> Result<SearchResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params
        .page_size
        .unwrap_or(retrieval.default_page_size)
        .clamp(0, retrieval.max_page_size);
    let query = params.query();
    let mut filter = params.filter();

    let mut degraded = false;
    let mut semantic = None;
    if let Some(q) = query {
        match models.embedding {
            Some(backend) => match query_vectors(backend, models.translation, q, target_language).await {
                Ok(vectors) => semantic = Some(SemanticQuery { text: q, vectors }),
                Err(e) => {
                    tracing::warn!(error = %format!("{:#}", e), "query embedding failed, falling back to text match");
                    degraded = true;
                }
            },
            None => degraded = true,
        }
        if semantic.is_none() {
            filter.text = Some(q.to_string());
        }
    }

    let req = RetrievalRequest {
        filter,
        viewer,
        semantic,
        page,
        page_size,
        params: RetrievalParams {
            threshold,
            overfetch: retrieval.overfetch,
        },
    };
    let result = retrieve(store, models.reranker, &req).await?;
    if let Some(ref err) = result.rerank_error {
        tracing::warn!(error = %err, "rerank failed, keeping vector order");
    }

    Ok(SearchResponse {
        page,
        page_size,
        query: query.map(str::to_string),
        degraded,
        result,
    })
}

/// Embed the query, plus its translation when it is written in a
/// non-Latin script and a translation model is available. A failed
/// translation only drops the second vector.
pub async fn query_vectors(
    embedding: &dyn AiBackend,
    translation: Option<&dyn AiBackend>,
    query: &str,
    target_language: &str,
) -> Result<QueryVectors> {
    let primary = embed::embed(embedding, query, Purpose::Query).await?;

    let translated = match translation {
        Some(tb) if has_non_latin(query) => {
            let attempt = async {
                let text = translate(tb, query, target_language).await?;
                tracing::debug!(query, translated = %text, "query translated");
                embed::embed(embedding, &text, Purpose::Query).await
            };
            match attempt.await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %format!("{:#}", e), "query translation failed, using original only");
                    None
                }
            }
        }
        _ => None,
    };

    Ok(QueryVectors { primary, translated })
}

/// Top records by importance, then recency.
pub async fn trending(ctx: &AppContext, limit: i64) -> Result<Vec<ContentRecord>> {
    ctx.store.trending(limit.clamp(1, ctx.config.retrieval.max_page_size)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedBackend;
    use newsroom_core::models::CrawlStatus;
    use newsroom_core::search::RetrievalMode;
    use newsroom_core::store::memory::InMemoryStore;

    fn record(title: &str, embedding: Option<Vec<f32>>) -> ContentRecord {
        ContentRecord {
            id: 0,
            raw_entry_id: None,
            source_id: None,
            source_name: None,
            title: title.into(),
            url: format!("https://n.test/{}", title.len()),
            snippet: title.into(),
            content: None,
            category: None,
            ai_category: None,
            ai_summary: None,
            ai_processed: true,
            sentiment: None,
            importance: Some(5),
            highlight: false,
            tags: vec![],
            published_at: Some(1),
            crawled_at: None,
            crawl_status: CrawlStatus::Pending,
            updated_at: 1,
            embedding,
        }
    }

    fn corpus() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_record(record("AI chips rally", Some(vec![1.0, 0.0]))).unwrap();
        store.insert_record(record("Football final", Some(vec![0.0, 1.0]))).unwrap();
        store
    }

    fn params(q: &str) -> SearchParams {
        SearchParams {
            q: Some(q.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_semantic_path_applies_threshold() {
        let store = corpus();
        let emb = ScriptedBackend::new(vec![]);
        let models = SearchModels {
            embedding: Some(&emb),
            ..Default::default()
        };
        let resp = search_with(&store, &models, &params("chips"), None, &RetrievalConfig::default(), 0.3, "English")
            .await
            .unwrap();
        assert!(!resp.degraded);
        assert_eq!(resp.result.mode, RetrievalMode::Semantic);
        assert_eq!(resp.result.matched, Some(1));
        assert_eq!(resp.result.items[0].hit.record.title, "AI chips rally");
    }

    #[tokio::test]
    async fn test_without_embedding_model_degrades_to_text() {
        let store = corpus();
        let resp = search_with(
            &store,
            &SearchModels::default(),
            &params("football"),
            None,
            &RetrievalConfig::default(),
            0.3,
            "English",
        )
        .await
        .unwrap();
        assert!(resp.degraded);
        assert_eq!(resp.result.mode, RetrievalMode::Scan);
        assert_eq!(resp.result.items.len(), 1);
        assert_eq!(resp.result.stats.global_total, 2);
        assert_eq!(resp.result.stats.filtered_total, 1);
    }

    #[tokio::test]
    async fn test_non_latin_query_is_translated_and_embedded_twice() {
        let emb = ScriptedBackend::new(vec![]);
        let tr = ScriptedBackend::new(vec![Ok("artificial intelligence".into())]);
        let v = query_vectors(&emb, Some(&tr), "人工智能", "English").await.unwrap();
        assert!(v.translated.is_some());
        assert_eq!(
            *emb.embedded.lock().unwrap(),
            vec!["人工智能".to_string(), "artificial intelligence".to_string()]
        );

        let emb = ScriptedBackend::new(vec![]);
        let v = query_vectors(&emb, Some(&tr), "chips", "English").await.unwrap();
        assert!(v.translated.is_none());
        assert_eq!(emb.embedded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_page_size_zero_returns_stats_only() {
        let store = corpus();
        let p = SearchParams {
            page_size: Some(0),
            ..Default::default()
        };
        let resp = search_with(&store, &SearchModels::default(), &p, None, &RetrievalConfig::default(), 0.3, "English")
            .await
            .unwrap();
        assert!(resp.result.items.is_empty());
        assert_eq!(resp.result.stats.global_total, 2);
    }
}
