//! HTTP API.
//!
//! All routes are JSON. The viewer identity for bookmarks comes from the
//! `X-Viewer-Id` header; without it bookmark counts are zero and
//! `bookmarked=true` returns no rows.
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/health` | Liveness and version |
//! | GET | `/api/news` | Filtered scan or semantic search, with stats |
//! | GET | `/api/news/trending` | Top 10 by importance |
//! | POST | `/api/news/{id}/crawl` | Extract one article |
//! | POST | `/api/news/{id}/enrich` | Summarize (and embed) one record |
//! | POST | `/api/news/{id}/translate` | Structured translation |
//! | GET, POST | `/api/sources` | List / add (validated) |
//! | DELETE | `/api/sources/{id}` | Remove with its content |
//! | POST | `/api/sources/validate` | Probe a feed URL |
//! | POST | `/api/sources/refresh` | Refresh all (or `?source=KEY`) |
//! | GET, POST | `/api/tasks` | Scheduled tasks |
//! | PUT, DELETE | `/api/tasks/{id}` | Update / delete |
//! | POST | `/api/tasks/{id}/run` | Run now |
//! | GET, POST | `/api/settings/models` | Model configurations |
//! | DELETE | `/api/settings/models/{id}` | Remove a model |
//! | GET, PUT | `/api/settings/ai` | Role assignments and threshold |
//! | GET, PUT | `/api/settings/proxy` | Outbound proxy |
//!
//! Errors are `{"error": {"code", "message"}}`. Task mutations reload the
//! schedule before responding.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use newsroom_core::models::{ContentRecord, NewSource, Source};

use crate::context::AppContext;
use crate::crawl::{self, CrawlOutcome};
use crate::enrich::{self, EnrichOutcome, TranslationResult};
use crate::error::PipelineError;
use crate::feed::FeedCheck;
use crate::ingest::{self, RefreshSummary};
use crate::scheduler::SchedulerRegistry;
use crate::search::{self, SearchParams, SearchResponse};
use crate::settings::{self, AiSettings, ModelConfig, ProxySettings};
use crate::sources;
use crate::tasks::{self, ScheduledTask, TaskInput, TaskRun};

const VIEWER_HEADER: &str = "x-viewer-id";
const MASKED: &str = "********";
const TRENDING_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub ctx: AppContext,
    pub scheduler: Arc<SchedulerRegistry>,
}

/// Start the scheduler and serve until Ctrl-C.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let scheduler = SchedulerRegistry::new(ctx.clone());
    scheduler.reload().await?;

    let app = router(AppState {
        ctx,
        scheduler: scheduler.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/news", get(handle_news))
        .route("/api/news/trending", get(handle_trending))
        .route("/api/news/{id}/crawl", post(handle_crawl))
        .route("/api/news/{id}/enrich", post(handle_enrich))
        .route("/api/news/{id}/translate", post(handle_translate))
        .route("/api/sources", get(handle_list_sources).post(handle_add_source))
        .route("/api/sources/{id}", delete(handle_delete_source))
        .route("/api/sources/validate", post(handle_validate_source))
        .route("/api/sources/refresh", post(handle_refresh))
        .route("/api/tasks", get(handle_list_tasks).post(handle_create_task))
        .route("/api/tasks/{id}", put(handle_update_task).delete(handle_delete_task))
        .route("/api/tasks/{id}/run", post(handle_run_task))
        .route("/api/settings/models", get(handle_list_models).post(handle_add_model))
        .route("/api/settings/models/{id}", delete(handle_delete_model))
        .route("/api/settings/ai", get(handle_get_ai).put(handle_put_ai))
        .route("/api/settings/proxy", get(handle_get_proxy).put(handle_put_proxy))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        classify_error(err)
    }
}

/// Map a pipeline error onto an HTTP status. Clients get the typed
/// error's own message, never the context chain; unclassified errors
/// become a generic 500 and are logged in full.
fn classify_error(err: anyhow::Error) -> AppError {
    let chain = format!("{:#}", err);
    let Some(kind) = PipelineError::classify(&err) else {
        tracing::error!(error = %chain, "request failed");
        return AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "internal server error".to_string(),
        };
    };
    let (status, code) = match kind {
        PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        PipelineError::Invalid(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        PipelineError::Busy(_) => (StatusCode::CONFLICT, "already_running"),
        PipelineError::Configuration(_) => (StatusCode::BAD_REQUEST, "not_configured"),
        PipelineError::ContentTooShort { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "content_too_short"),
        PipelineError::Transport(_) => (StatusCode::BAD_GATEWAY, "transport"),
        PipelineError::ProviderResponse(_) => (StatusCode::BAD_GATEWAY, "invalid_ai_response"),
    };
    if status.is_server_error() {
        tracing::warn!(error = %chain, status = status.as_u16(), "upstream failure");
    } else {
        tracing::debug!(error = %chain, status = status.as_u16(), "request rejected");
    }
    AppError {
        status,
        code,
        message: kind.to_string(),
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

fn viewer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(VIEWER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ News ============

async fn handle_news(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    let viewer = viewer(&headers);
    Ok(Json(search::search(&state.ctx, &params, viewer.as_deref()).await?))
}

async fn handle_trending(State(state): State<AppState>) -> ApiResult<Vec<ContentRecord>> {
    Ok(Json(search::trending(&state.ctx, TRENDING_LIMIT).await?))
}

async fn handle_crawl(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<CrawlOutcome> {
    Ok(Json(crawl::crawl_record(&state.ctx, id).await?))
}

#[derive(Deserialize)]
struct EnrichQuery {
    summary_length: Option<u32>,
}

async fn handle_enrich(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<EnrichQuery>,
) -> ApiResult<EnrichOutcome> {
    Ok(Json(enrich::enrich_record(&state.ctx, id, q.summary_length).await?))
}

#[derive(Deserialize)]
struct TranslateQuery {
    language: Option<String>,
}

async fn handle_translate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<TranslateQuery>,
) -> ApiResult<TranslationResult> {
    Ok(Json(
        enrich::translate_record(&state.ctx, id, q.language.as_deref()).await?,
    ))
}

// ============ Sources ============

async fn handle_list_sources(State(state): State<AppState>) -> ApiResult<Vec<Source>> {
    Ok(Json(sources::list_sources(&state.ctx.pool).await?))
}

async fn handle_add_source(
    State(state): State<AppState>,
    Json(new): Json<NewSource>,
) -> Result<(StatusCode, Json<Source>), AppError> {
    let source = sources::add_source(&state.ctx.pool, &state.ctx.feeds, &new).await?;
    Ok((StatusCode::CREATED, Json(source)))
}

async fn handle_delete_source(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    let source = sources::get_source(&state.ctx.pool, id)
        .await?
        .ok_or_else(|| anyhow::Error::from(PipelineError::NotFound(format!("source {}", id))))?;
    let removed = sources::remove_source(&state.ctx.pool, state.ctx.store.as_ref(), &source.key).await?;
    Ok(Json(serde_json::to_value(removed).map_err(anyhow::Error::from)?))
}

#[derive(Deserialize)]
struct ValidateBody {
    url: String,
}

async fn handle_validate_source(State(state): State<AppState>, Json(body): Json<ValidateBody>) -> ApiResult<FeedCheck> {
    Ok(Json(state.ctx.feeds.validate(&body.url).await?))
}

#[derive(Deserialize)]
struct RefreshQuery {
    source: Option<String>,
}

async fn handle_refresh(State(state): State<AppState>, Query(q): Query<RefreshQuery>) -> ApiResult<RefreshSummary> {
    Ok(Json(ingest::refresh_all(&state.ctx, q.source.as_deref()).await?))
}

// ============ Tasks ============

async fn handle_list_tasks(State(state): State<AppState>) -> ApiResult<Vec<ScheduledTask>> {
    Ok(Json(tasks::list_tasks(&state.ctx.pool).await?))
}

async fn handle_create_task(
    State(state): State<AppState>,
    Json(input): Json<TaskInput>,
) -> Result<(StatusCode, Json<ScheduledTask>), AppError> {
    let task = tasks::create_task(&state.ctx.pool, &input).await?;
    state.scheduler.reload().await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn handle_update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<TaskInput>,
) -> ApiResult<ScheduledTask> {
    let task = tasks::update_task(&state.ctx.pool, id, &input).await?;
    state.scheduler.reload().await?;
    Ok(Json(task))
}

async fn handle_delete_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    tasks::delete_task(&state.ctx.pool, id).await?;
    state.scheduler.reload().await?;
    Ok(Json(json!({ "deleted": id })))
}

async fn handle_run_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<TaskRun> {
    Ok(Json(tasks::run_task_now(&state.ctx, id).await?))
}

// ============ Settings ============

async fn handle_list_models(State(state): State<AppState>) -> ApiResult<Vec<ModelConfig>> {
    Ok(Json(settings::list_models(&state.ctx.pool).await?))
}

async fn handle_add_model(
    State(state): State<AppState>,
    Json(model): Json<ModelConfig>,
) -> Result<(StatusCode, Json<ModelConfig>), AppError> {
    let id = settings::add_model(&state.ctx.pool, &model).await?;
    let stored = settings::get_model(&state.ctx.pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("model {} vanished after insert", id))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn handle_delete_model(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    if !settings::remove_model(&state.ctx.pool, id).await? {
        return Err(PipelineError::NotFound(format!("model {}", id)).into());
    }
    Ok(Json(json!({ "deleted": id })))
}

async fn handle_get_ai(State(state): State<AppState>) -> ApiResult<AiSettings> {
    Ok(Json(settings::load_ai_settings(&state.ctx.pool).await?))
}

async fn handle_put_ai(State(state): State<AppState>, Json(body): Json<AiSettings>) -> ApiResult<AiSettings> {
    settings::save_ai_settings(&state.ctx.pool, &body).await?;
    Ok(Json(settings::load_ai_settings(&state.ctx.pool).await?))
}

fn masked(mut p: ProxySettings) -> ProxySettings {
    if p.password.is_some() {
        p.password = Some(MASKED.to_string());
    }
    p
}

async fn handle_get_proxy(State(state): State<AppState>) -> ApiResult<ProxySettings> {
    Ok(Json(masked(settings::load_proxy(&state.ctx.pool).await?)))
}

async fn handle_put_proxy(
    State(state): State<AppState>,
    Json(mut body): Json<ProxySettings>,
) -> ApiResult<ProxySettings> {
    // A masked password echoed back by a client keeps the stored one.
    if body.password.as_deref() == Some(MASKED) {
        body.password = settings::load_proxy(&state.ctx.pool).await?.password;
    }
    settings::save_proxy(&state.ctx.pool, &body).await?;
    Ok(Json(masked(settings::load_proxy(&state.ctx.pool).await?)))
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        classify_error(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    async fn spawn(ctx: AppContext) -> String {
        let state = AppState {
            scheduler: SchedulerRegistry::new(ctx.clone()),
            ctx,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_error_classification() {
        let e = classify_error(PipelineError::NotFound("content record 9".into()).into());
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.message, "content record 9 not found");
        let e = classify_error(PipelineError::missing_role("summary").into());
        assert_eq!((e.status, e.code), (StatusCode::BAD_REQUEST, "not_configured"));
        let e = classify_error(PipelineError::ContentTooShort { chars: 3, min: 100 }.into());
        assert_eq!(e.status, StatusCode::UNPROCESSABLE_ENTITY);
        let e = classify_error(PipelineError::Transport("net::ERR_EMPTY_RESPONSE".into()).into());
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        let e = classify_error(PipelineError::invalid("task name must not be empty").into());
        assert_eq!((e.status, e.code), (StatusCode::BAD_REQUEST, "bad_request"));
        let e = classify_error(anyhow::anyhow!("disk on fire"));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_message_omits_context_chain() {
        let err = anyhow::anyhow!("error returned from database: no such column: c.secret_col")
            .context("loading record");
        let e = classify_error(err);
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.message, "internal server error");
        assert!(!e.message.contains("secret_col"));

        let err = anyhow::Error::from(PipelineError::Transport("proxy 10.0.0.5 refused".into()))
            .context("crawling record 4 from https://a.test/x");
        let e = classify_error(err);
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        assert_eq!(e.message, "transport error: proxy 10.0.0.5 refused");
        assert!(!e.message.contains("crawling record"));
    }

    #[tokio::test]
    async fn test_health_and_empty_news() {
        let (_tmp, ctx) = test_context().await;
        let base = spawn(ctx).await;
        let client = reqwest::Client::new();

        let health: Value = client.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");

        let news: Value = client
            .get(format!("{}/api/news?q=anything&page_size=5", base))
            .header("X-Viewer-Id", "v1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(news["degraded"], true);
        assert_eq!(news["stats"]["global_total"], 0);
        assert_eq!(news["items"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_enrich_without_model_is_400_and_missing_record_404() {
        let (_tmp, ctx) = test_context().await;
        let base = spawn(ctx).await;
        let client = reqwest::Client::new();

        let resp = client.post(format!("{}/api/news/1/enrich", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_configured");

        let resp = client.post(format!("{}/api/tasks/42/run", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_invalid_task_is_400_with_short_message() {
        let (_tmp, ctx) = test_context().await;
        let base = spawn(ctx).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/api/tasks", base))
            .json(&json!({"name": "t", "task_type": "ai-enrich", "cron": "* *"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
        assert_eq!(
            body["error"]["message"],
            "cron expression must have 5 or 6 fields, got 2: '* *'"
        );
    }

    #[tokio::test]
    async fn test_proxy_password_is_masked() {
        let (_tmp, ctx) = test_context().await;
        let base = spawn(ctx.clone()).await;
        let client = reqwest::Client::new();

        let body = json!({
            "enabled": true, "protocol": "socks5", "host": "127.0.0.1", "port": 1080,
            "username": "u", "password": "secret"
        });
        let out: Value = client
            .put(format!("{}/api/settings/proxy", base))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(out["password"], MASKED);

        let echoed = json!({
            "enabled": true, "protocol": "socks5", "host": "127.0.0.1", "port": 1080,
            "username": "u", "password": MASKED
        });
        client
            .put(format!("{}/api/settings/proxy", base))
            .json(&echoed)
            .send()
            .await
            .unwrap();
        let stored = settings::load_proxy(&ctx.pool).await.unwrap();
        assert_eq!(stored.password.as_deref(), Some("secret"));
    }
}
