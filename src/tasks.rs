//! Scheduled-task records and their execution.
//!
//! Each row names a batch job and a cron expression. Running a task, from
//! a scheduler tick or on demand, moves it `running → success | error`
//! and records the finish time and error text. A failing job is recorded,
//! never propagated.
//!
//! Overlap is guarded in memory by [`InFlight`]: a task id runs at most
//! once at a time in this process. The stored `running` status is only a
//! report; rows left `running` by a previous process are marked
//! interrupted by [`recover_interrupted`].

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tokio_cron_scheduler::Job;

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::{crawl, enrich, ingest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    #[serde(alias = "feed-refresh-all")]
    FeedRefresh,
    #[serde(alias = "ai-enrich-backlog")]
    AiEnrich,
    CrawlBacklog,
    EmbeddingBackfill,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FeedRefresh => "feed-refresh",
            TaskType::AiEnrich => "ai-enrich",
            TaskType::CrawlBacklog => "crawl-backlog",
            TaskType::EmbeddingBackfill => "embedding-backfill",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "feed-refresh" | "feed-refresh-all" => Ok(TaskType::FeedRefresh),
            "ai-enrich" | "ai-enrich-backlog" => Ok(TaskType::AiEnrich),
            "crawl-backlog" => Ok(TaskType::CrawlBacklog),
            "embedding-backfill" => Ok(TaskType::EmbeddingBackfill),
            other => Err(PipelineError::invalid(format!(
                "Unknown task type: '{}'. Must be feed-refresh, ai-enrich, crawl-backlog, or embedding-backfill.",
                other
            ))
            .into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Running,
    Success,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "success" => TaskStatus::Success,
            "error" => TaskStatus::Error,
            _ => TaskStatus::Idle,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub task_type: TaskType,
    /// Six-field form, seconds first.
    pub cron: String,
    pub enabled: bool,
    pub config: Value,
    pub last_run_at: Option<i64>,
    pub last_status: TaskStatus,
    pub last_error: Option<String>,
}

/// Create/update payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    pub name: String,
    pub task_type: TaskType,
    pub cron: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Option<Value>,
}

fn default_enabled() -> bool {
    true
}

/// Task ids with a run in progress.
#[derive(Debug, Default)]
pub struct InFlight {
    ids: Mutex<HashSet<i64>>,
}

/// Held for the duration of one run; releases the id on drop.
pub struct RunPermit<'a> {
    owner: &'a InFlight,
    id: i64,
}

impl InFlight {
    fn ids(&self) -> std::sync::MutexGuard<'_, HashSet<i64>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_begin(&self, id: i64) -> Option<RunPermit<'_>> {
        self.ids().insert(id).then_some(RunPermit { owner: self, id })
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids().contains(&id)
    }
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        self.owner.ids().remove(&self.id);
    }
}

pub const INTERRUPTED: &str = "interrupted";

/// Mark rows still `running` with no run in this process as failed.
/// Returns the number of rows reset.
pub async fn recover_interrupted(pool: &SqlitePool, in_flight: &InFlight) -> Result<usize> {
    let running: Vec<i64> = sqlx::query_scalar("SELECT id FROM scheduled_tasks WHERE last_status = ?")
        .bind(TaskStatus::Running.as_str())
        .fetch_all(pool)
        .await?;
    let mut reset = 0;
    for id in running.into_iter().filter(|id| !in_flight.contains(*id)) {
        record_status(pool, id, TaskStatus::Error, Some(INTERRUPTED), None).await?;
        tracing::warn!(task = id, "task was left running by a previous process");
        reset += 1;
    }
    Ok(reset)
}

/// Validate a cron expression; five-field input gets a leading `0`
/// seconds field.
pub fn normalize_cron(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(PipelineError::invalid(format!(
                "cron expression must have 5 or 6 fields, got {}: '{}'",
                n, expr
            ))
            .into())
        }
    };
    Job::new_async(normalized.as_str(), |_uuid, _l| Box::pin(async {}))
        .map_err(|e| PipelineError::invalid(format!("invalid cron expression '{}': {}", expr, e)))?;
    Ok(normalized)
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ScheduledTask> {
    let task_type: String = row.try_get("task_type")?;
    let status: String = row.try_get("last_status")?;
    let config: String = row.try_get("config_json")?;
    Ok(ScheduledTask {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        task_type: TaskType::parse(&task_type)?,
        cron: row.try_get("cron")?,
        enabled: row.try_get("enabled")?,
        config: serde_json::from_str(&config).unwrap_or(Value::Object(Default::default())),
        last_run_at: row.try_get("last_run_at")?,
        last_status: TaskStatus::parse(&status),
        last_error: row.try_get("last_error")?,
    })
}

pub async fn list_tasks(pool: &SqlitePool) -> Result<Vec<ScheduledTask>> {
    let rows = sqlx::query("SELECT * FROM scheduled_tasks ORDER BY id")
        .fetch_all(pool)
        .await?;
    rows.iter().map(task_from_row).collect()
}

pub async fn get_task(pool: &SqlitePool, id: i64) -> Result<ScheduledTask> {
    let row = sqlx::query("SELECT * FROM scheduled_tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(r) => task_from_row(&r),
        None => Err(PipelineError::NotFound(format!("task {}", id)).into()),
    }
}

fn config_json(input: &TaskInput) -> Result<String> {
    let config = input
        .config
        .clone()
        .unwrap_or(Value::Object(Default::default()));
    if !config.is_object() {
        return Err(PipelineError::invalid("task config must be a JSON object").into());
    }
    Ok(serde_json::to_string(&config)?)
}

pub async fn create_task(pool: &SqlitePool, input: &TaskInput) -> Result<ScheduledTask> {
    if input.name.trim().is_empty() {
        return Err(PipelineError::invalid("task name must not be empty").into());
    }
    let cron = normalize_cron(&input.cron)?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO scheduled_tasks (name, task_type, cron, enabled, config_json) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(input.name.trim())
    .bind(input.task_type.as_str())
    .bind(&cron)
    .bind(input.enabled)
    .bind(config_json(input)?)
    .fetch_one(pool)
    .await?;
    get_task(pool, id).await
}

pub async fn update_task(pool: &SqlitePool, id: i64, input: &TaskInput) -> Result<ScheduledTask> {
    let cron = normalize_cron(&input.cron)?;
    let done = sqlx::query(
        "UPDATE scheduled_tasks SET name = ?, task_type = ?, cron = ?, enabled = ?, config_json = ? WHERE id = ?",
    )
    .bind(input.name.trim())
    .bind(input.task_type.as_str())
    .bind(&cron)
    .bind(input.enabled)
    .bind(config_json(input)?)
    .bind(id)
    .execute(pool)
    .await?;
    if done.rows_affected() == 0 {
        return Err(PipelineError::NotFound(format!("task {}", id)).into());
    }
    get_task(pool, id).await
}

pub async fn delete_task(pool: &SqlitePool, id: i64) -> Result<()> {
    let done = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(PipelineError::NotFound(format!("task {}", id)).into());
    }
    Ok(())
}

async fn record_status(
    pool: &SqlitePool,
    id: i64,
    status: TaskStatus,
    error: Option<&str>,
    at: Option<i64>,
) -> Result<()> {
    sqlx::query(
        "UPDATE scheduled_tasks SET last_status = ?, last_error = ?, last_run_at = COALESCE(?, last_run_at) WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Result of one execution.
#[derive(Debug, Serialize)]
pub struct TaskRun {
    pub id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn dispatch(ctx: &AppContext, task: &ScheduledTask) -> Result<Value> {
    Ok(match task.task_type {
        TaskType::FeedRefresh => {
            let only = task.config.get("source").and_then(Value::as_str);
            serde_json::to_value(ingest::refresh_all(ctx, only).await?)?
        }
        TaskType::AiEnrich => serde_json::to_value(enrich::enrich_backlog(ctx).await?)?,
        TaskType::CrawlBacklog => serde_json::to_value(crawl::crawl_backlog(ctx).await?)?,
        TaskType::EmbeddingBackfill => serde_json::to_value(enrich::embedding_backfill(ctx).await?)?,
    })
}

/// Run a task with status bookkeeping. Only bookkeeping failures and
/// [`PipelineError::Busy`] are returned as errors; a failing job is
/// reported in the [`TaskRun`].
pub async fn run_task(ctx: &AppContext, task: &ScheduledTask) -> Result<TaskRun> {
    let Some(_permit) = ctx.in_flight.try_begin(task.id) else {
        return Err(PipelineError::Busy(task.id).into());
    };
    record_status(&ctx.pool, task.id, TaskStatus::Running, None, None).await?;
    tracing::info!(task = task.id, name = %task.name, task_type = task.task_type.as_str(), "task started");

    let result = dispatch(ctx, task).await;
    let now = chrono::Utc::now().timestamp();
    match result {
        Ok(output) => {
            record_status(&ctx.pool, task.id, TaskStatus::Success, None, Some(now)).await?;
            tracing::info!(task = task.id, "task finished");
            Ok(TaskRun {
                id: task.id,
                task_type: task.task_type,
                status: TaskStatus::Success,
                output: Some(output),
                error: None,
            })
        }
        Err(e) => {
            let message = format!("{:#}", e);
            record_status(&ctx.pool, task.id, TaskStatus::Error, Some(&message), Some(now)).await?;
            tracing::error!(task = task.id, error = %message, "task failed");
            Ok(TaskRun {
                id: task.id,
                task_type: task.task_type,
                status: TaskStatus::Error,
                output: None,
                error: Some(message),
            })
        }
    }
}

pub async fn run_task_now(ctx: &AppContext, id: i64) -> Result<TaskRun> {
    let task = get_task(&ctx.pool, id).await?;
    run_task(ctx, &task).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    fn input(cron: &str, task_type: TaskType) -> TaskInput {
        TaskInput {
            name: "nightly".into(),
            task_type,
            cron: cron.into(),
            enabled: true,
            config: None,
        }
    }

    #[test]
    fn test_normalize_cron() {
        assert_eq!(normalize_cron("*/15 * * * *").unwrap(), "0 */15 * * * *");
        assert_eq!(normalize_cron("30 0 6 * * *").unwrap(), "30 0 6 * * *");
        assert!(normalize_cron("* *").is_err());
        assert!(normalize_cron("0 99 * * * *").is_err());
    }

    #[test]
    fn test_task_type_aliases() {
        assert_eq!(TaskType::parse("feed-refresh-all").unwrap(), TaskType::FeedRefresh);
        assert_eq!(TaskType::parse("ai_enrich_backlog").unwrap(), TaskType::AiEnrich);
        assert!(TaskType::parse("reindex").is_err());
        let t: TaskType = serde_json::from_str("\"ai-enrich-backlog\"").unwrap();
        assert_eq!(t, TaskType::AiEnrich);
    }

    #[tokio::test]
    async fn test_crud() {
        let (_tmp, ctx) = test_context().await;
        let t = create_task(&ctx.pool, &input("0 * * * *", TaskType::FeedRefresh))
            .await
            .unwrap();
        assert_eq!(t.cron, "0 0 * * * *");
        assert_eq!(t.last_status, TaskStatus::Idle);

        let mut changed = input("0 6 * * *", TaskType::CrawlBacklog);
        changed.enabled = false;
        let t = update_task(&ctx.pool, t.id, &changed).await.unwrap();
        assert_eq!(t.task_type, TaskType::CrawlBacklog);
        assert!(!t.enabled);

        assert!(create_task(&ctx.pool, &input("bad", TaskType::AiEnrich)).await.is_err());

        delete_task(&ctx.pool, t.id).await.unwrap();
        assert!(list_tasks(&ctx.pool).await.unwrap().is_empty());
        assert!(delete_task(&ctx.pool, t.id).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_job_is_recorded_not_raised() {
        let (_tmp, ctx) = test_context().await;
        let t = create_task(&ctx.pool, &input("0 * * * *", TaskType::EmbeddingBackfill))
            .await
            .unwrap();

        let run = run_task_now(&ctx, t.id).await.unwrap();
        assert_eq!(run.status, TaskStatus::Error);
        assert!(run.error.unwrap().contains("no embedding model"));

        let t = get_task(&ctx.pool, t.id).await.unwrap();
        assert_eq!(t.last_status, TaskStatus::Error);
        assert!(t.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_run_is_refused_while_in_flight() {
        let (_tmp, ctx) = test_context().await;
        let t = create_task(&ctx.pool, &input("0 * * * *", TaskType::FeedRefresh))
            .await
            .unwrap();

        let permit = ctx.in_flight.try_begin(t.id).unwrap();
        let err = run_task_now(&ctx, t.id).await.unwrap_err();
        assert!(matches!(PipelineError::classify(&err), Some(PipelineError::Busy(id)) if *id == t.id));
        drop(permit);

        let run = run_task_now(&ctx, t.id).await.unwrap();
        assert_eq!(run.status, TaskStatus::Success);
        assert!(!ctx.in_flight.contains(t.id));
    }

    #[tokio::test]
    async fn test_recover_interrupted_skips_live_runs() {
        let (_tmp, ctx) = test_context().await;
        let stale = create_task(&ctx.pool, &input("0 * * * *", TaskType::FeedRefresh))
            .await
            .unwrap();
        let live = create_task(&ctx.pool, &input("0 * * * *", TaskType::FeedRefresh))
            .await
            .unwrap();
        sqlx::query("UPDATE scheduled_tasks SET last_status = 'running'")
            .execute(&ctx.pool)
            .await
            .unwrap();

        let _permit = ctx.in_flight.try_begin(live.id).unwrap();
        assert_eq!(recover_interrupted(&ctx.pool, &ctx.in_flight).await.unwrap(), 1);

        let stale = get_task(&ctx.pool, stale.id).await.unwrap();
        assert_eq!(stale.last_status, TaskStatus::Error);
        assert_eq!(stale.last_error.as_deref(), Some(INTERRUPTED));
        assert_eq!(get_task(&ctx.pool, live.id).await.unwrap().last_status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_refresh_with_no_sources_succeeds() {
        let (_tmp, ctx) = test_context().await;
        let t = create_task(&ctx.pool, &input("0 * * * *", TaskType::FeedRefresh))
            .await
            .unwrap();
        let run = run_task_now(&ctx, t.id).await.unwrap();
        assert_eq!(run.status, TaskStatus::Success);
        assert_eq!(run.output.unwrap()["newly_ingested"], 0);
        assert!(get_task(&ctx.pool, t.id).await.unwrap().last_error.is_none());
    }
}
