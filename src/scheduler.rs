//! Cron registry for scheduled tasks.
//!
//! The registry owns at most one running [`JobScheduler`]. [`reload`]
//! builds a fresh one from the enabled task rows, stops the old one and
//! installs the new one under a single lock, so a deleted or disabled task
//! never keeps a timer. Ticks re-read their row before running and skip a
//! task whose previous run is still in flight. Rows left `running` by an
//! earlier process are reset on reload.
//!
//! [`reload`]: SchedulerRegistry::reload

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::tasks;

pub struct SchedulerRegistry {
    ctx: AppContext,
    enabled: bool,
    current: Mutex<Option<JobScheduler>>,
}

impl SchedulerRegistry {
    pub fn new(ctx: AppContext) -> Arc<Self> {
        let enabled = ctx.config.scheduler.enabled;
        Arc::new(Self {
            ctx,
            enabled,
            current: Mutex::new(None),
        })
    }

    /// Replace every timer with one per enabled task. Returns the number
    /// of scheduled jobs.
    pub async fn reload(&self) -> Result<usize> {
        if !self.enabled {
            tracing::debug!("scheduler disabled, skipping reload");
            return Ok(0);
        }

        let mut current = self.current.lock().await;
        tasks::recover_interrupted(&self.ctx.pool, &self.ctx.in_flight).await?;
        let rows = tasks::list_tasks(&self.ctx.pool).await?;

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let mut scheduled = 0;
        for task in rows.into_iter().filter(|t| t.enabled) {
            let ctx = self.ctx.clone();
            let id = task.id;
            let job = Job::new_async(task.cron.as_str(), move |_uuid, _l| {
                let ctx = ctx.clone();
                Box::pin(async move { tick(&ctx, id).await })
            });
            match job {
                Ok(job) => {
                    sched.add(job).await.context("adding scheduler job")?;
                    scheduled += 1;
                }
                Err(e) => {
                    tracing::warn!(task = id, cron = %task.cron, error = %e, "skipping task with invalid cron");
                }
            }
        }

        if let Some(mut old) = current.take() {
            if let Err(e) = old.shutdown().await {
                tracing::warn!(error = %e, "stopping previous scheduler failed");
            }
        }
        sched.start().await.context("starting scheduler")?;
        *current = Some(sched);

        tracing::info!(jobs = scheduled, "schedule reloaded");
        Ok(scheduled)
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(mut sched) = self.current.lock().await.take() {
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.current.lock().await.is_some()
    }
}

async fn tick(ctx: &AppContext, id: i64) {
    let task = match tasks::get_task(&ctx.pool, id).await {
        Ok(t) if t.enabled => t,
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(task = id, error = %format!("{:#}", e), "scheduled task missing");
            return;
        }
    };
    if ctx.in_flight.contains(id) {
        tracing::warn!(task = id, "previous run still in progress, skipping tick");
        return;
    }
    match tasks::run_task(ctx, &task).await {
        Ok(_) => {}
        Err(e) if matches!(PipelineError::classify(&e), Some(PipelineError::Busy(_))) => {
            tracing::warn!(task = id, "previous run still in progress, skipping tick");
        }
        Err(e) => {
            tracing::error!(task = id, error = %format!("{:#}", e), "recording task status failed");
        }
    }
}
