//! FIFO-by-creation pull queue with bounded concurrency (§4.5), generalizing the donor workflow
//! engine's ready-nodes execution loop into a flat handler-registry job runner.

use crate::handler::HandlerRegistry;
use chrono::Utc;
use qntx_core::{Error, Job, JobCheckpoint, JobStatus, Progress, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Exponential back-off ceiling applied to every handler unless overridden.
const DEFAULT_MAX_RETRIES: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(60);
/// Grace period handlers get to checkpoint after a shutdown signal before the process moves on.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct AsyncJobs {
    pool: SqlitePool,
    handlers: HandlerRegistry,
    concurrency: Arc<Semaphore>,
    paused: Arc<AtomicBool>,
}

impl AsyncJobs {
    pub fn new(pool: SqlitePool, handlers: HandlerRegistry, concurrency: usize) -> Self {
        Self { pool, handlers, concurrency: Arc::new(Semaphore::new(concurrency)), paused: Arc::new(AtomicBool::new(false)) }
    }

    /// Cooperative pause: workers observe this flag between stages, not mid-handler.
    pub fn request_pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub async fn submit(&self, source: &str, handler_name: &str, payload: serde_json::Value) -> Result<String> {
        self.submit_with_state(source, handler_name, payload, None).await
    }

    /// Submits a job with an initial `pulse_state` (§3) — used by [`crate::scheduled::ScheduledJobs`]
    /// to record the overlap-policy decision (e.g. `skip_prior_running`) on the materialized job
    /// itself rather than in its handler-owned `payload`.
    pub async fn submit_with_state(
        &self,
        source: &str,
        handler_name: &str,
        payload: serde_json::Value,
        pulse_state: Option<serde_json::Value>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO async_ix_jobs (id, source, status, progress_current, progress_total, \
             retry_count, handler_name, payload, pulse_state, created_at, updated_at) \
             VALUES (?, ?, 'pending', 0, 0, 0, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(source)
        .bind(handler_name)
        .bind(payload.to_string())
        .bind(pulse_state.map(|s| s.to_string()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e))?;
        Ok(id)
    }

    /// Runs until `cancel` fires. On restart, jobs left `running` from a prior process are
    /// re-queued as `pending` with their checkpoint intact before the pull loop starts.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.requeue_orphaned_running_jobs().await?;

        loop {
            if cancel.is_cancelled() {
                info!("async jobs queue stopping, waiting for in-flight workers to checkpoint");
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                return Ok(());
            }

            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let Some(permit) = self.concurrency.clone().try_acquire_owned().ok() else {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            };

            let Some(job_id) = self.next_pending_job().await? else {
                drop(permit);
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            };

            let pool = self.pool.clone();
            let handlers = self.handlers.clone();
            let worker_cancel = cancel.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = run_one(&pool, &handlers, &job_id, worker_cancel).await {
                    error!(job_id, error = %e, "job execution loop error");
                }
            });
        }
    }

    async fn requeue_orphaned_running_jobs(&self) -> Result<()> {
        let result = sqlx::query("UPDATE async_ix_jobs SET status = 'pending', updated_at = ? WHERE status = 'running'")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e))?;
        if result.rows_affected() > 0 {
            info!(count = result.rows_affected(), "re-queued orphaned running jobs as pending");
        }
        Ok(())
    }

    async fn next_pending_job(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT id FROM async_ix_jobs WHERE status = 'pending' ORDER BY created_at ASC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e))?;
        Ok(row.map(|r| r.get::<String, _>("id")))
    }

    /// Fetches one job by id, including its checkpoint and pulse-state bookkeeping.
    pub async fn get(&self, job_id: &str) -> Result<Job> {
        load_job(&self.pool, job_id).await
    }

    /// Lists jobs newest-first, optionally narrowed to one status.
    pub async fn list(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>> {
        let rows = if let Some(status) = status {
            sqlx::query("SELECT id FROM async_ix_jobs WHERE status = ? ORDER BY created_at DESC LIMIT ?")
                .bind(status_str(status))
                .bind(limit)
                .fetch_all(&self.pool)
                .await
        } else {
            sqlx::query("SELECT id FROM async_ix_jobs ORDER BY created_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await
        }
        .map_err(|e| Error::Database(e))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(load_job(&self.pool, &row.get::<String, _>("id")).await?);
        }
        Ok(jobs)
    }

    /// Cancels a job that has not yet reached a terminal state.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let job = load_job(&self.pool, job_id).await?;
        if job.status.is_terminal() {
            return Err(Error::conflict(format!("job {} already in terminal state", job_id)));
        }
        set_status(&self.pool, job_id, JobStatus::Cancelled).await?;
        clear_checkpoint(&self.pool, job_id).await
    }

    /// Administrative pause: a job not yet terminal is parked as `paused` until [`Self::resume`]
    /// is called. The worker loop never transitions a job into `running` while it is `paused`.
    pub async fn pause(&self, job_id: &str) -> Result<()> {
        let job = load_job(&self.pool, job_id).await?;
        if job.status.is_terminal() {
            return Err(Error::conflict(format!("job {} already in terminal state", job_id)));
        }
        set_status(&self.pool, job_id, JobStatus::Paused).await
    }

    /// Resumes a paused job as `pending`; the handler consults `job.pulse_state` and the
    /// persisted checkpoint to skip already-completed work.
    pub async fn resume_job(&self, job_id: &str) -> Result<()> {
        let job = load_job(&self.pool, job_id).await?;
        if job.status != JobStatus::Paused {
            return Err(Error::conflict(format!("job {} is not paused", job_id)));
        }
        set_status(&self.pool, job_id, JobStatus::Pending).await
    }

    /// Upserts the job's single checkpoint (§3). Invariant: a checkpoint exists iff the job has
    /// completed at least one stage but has not yet reached a terminal status — callers only
    /// invoke this for non-terminal transitions; terminal transitions clear it instead.
    pub async fn save_checkpoint(&self, job_id: &str, stage: &str, progress: serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_checkpoints (job_id, stage, progress, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(job_id) DO UPDATE SET stage = excluded.stage, progress = excluded.progress, \
             updated_at = excluded.updated_at",
        )
        .bind(job_id)
        .bind(stage)
        .bind(progress.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    pub async fn get_checkpoint(&self, job_id: &str) -> Result<Option<JobCheckpoint>> {
        let row = sqlx::query("SELECT job_id, stage, progress FROM job_checkpoints WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(|r| {
            Ok(JobCheckpoint {
                job_id: r.get("job_id"),
                stage: r.get("stage"),
                progress: serde_json::from_str(&r.get::<String, _>("progress")).unwrap_or(serde_json::Value::Null),
            })
        })
        .transpose()
    }

    /// Task-log entries for a job, oldest first, for the job-detail API (§6). No truncation.
    pub async fn list_task_logs(&self, job_id: &str) -> Result<Vec<TaskLogEntry>> {
        let rows = sqlx::query(
            "SELECT stage, task_id, timestamp, level, message, metadata FROM task_logs \
             WHERE job_id = ? ORDER BY timestamp ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows
            .into_iter()
            .map(|r| TaskLogEntry {
                stage: r.get("stage"),
                task_id: r.get("task_id"),
                timestamp: r.get::<String, _>("timestamp").parse().unwrap_or_else(|_| Utc::now()),
                level: r.get("level"),
                message: r.get("message"),
                metadata: r
                    .get::<Option<String>, _>("metadata")
                    .and_then(|m| serde_json::from_str(&m).ok()),
            })
            .collect())
    }
}

/// One structured task-log entry attached to a job (§4.5/§6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskLogEntry {
    pub stage: String,
    pub task_id: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

async fn clear_checkpoint(pool: &SqlitePool, job_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM job_checkpoints WHERE job_id = ?")
        .bind(job_id)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
    Ok(())
}

async fn load_job(pool: &SqlitePool, job_id: &str) -> Result<Job> {
    let row = sqlx::query(
        "SELECT id, source, status, progress_current, progress_total, cost_estimate, cost_actual, \
         handler_name, payload, retry_count, created_at, started_at, completed_at, updated_at, \
         parent_job_id, pulse_state FROM async_ix_jobs WHERE id = ?",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::Database(e))?
    .ok_or_else(|| Error::not_found(format!("job {} not found", job_id)))?;

    let status: String = row.get("status");
    let payload: String = row.get("payload");

    Ok(Job {
        id: row.get("id"),
        source: row.get("source"),
        status: parse_status(&status)?,
        progress: Progress { current: row.get("progress_current"), total: row.get("progress_total") },
        cost_estimate: row.get("cost_estimate"),
        cost_actual: row.get("cost_actual"),
        handler_name: row.get("handler_name"),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        retry_count: row.get("retry_count"),
        created_at: row.get::<String, _>("created_at").parse().map_err(|_| Error::corrupt("bad created_at"))?,
        started_at: row.get::<Option<String>, _>("started_at").and_then(|s| s.parse().ok()),
        completed_at: row.get::<Option<String>, _>("completed_at").and_then(|s| s.parse().ok()),
        updated_at: row.get::<String, _>("updated_at").parse().map_err(|_| Error::corrupt("bad updated_at"))?,
        parent_job_id: row.get("parent_job_id"),
        pulse_state: row
            .get::<Option<String>, _>("pulse_state")
            .and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn parse_status(s: &str) -> Result<JobStatus> {
    Ok(match s {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "paused" => JobStatus::Paused,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        other => return Err(Error::corrupt(format!("unknown job status: {}", other))),
    })
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Paused => "paused",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

async fn set_status(pool: &SqlitePool, job_id: &str, status: JobStatus) -> Result<()> {
    sqlx::query("UPDATE async_ix_jobs SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status_str(status))
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(pool)
        .await
        .map_err(|e| Error::Database(e))?;
    Ok(())
}

async fn run_one(pool: &SqlitePool, handlers: &HandlerRegistry, job_id: &str, cancel: CancellationToken) -> Result<()> {
    let job = load_job(pool, job_id).await?;

    if job.status.is_terminal() {
        return Ok(());
    }

    let Some(handler) = handlers.get(&job.handler_name) else {
        warn!(job_id, handler_name = %job.handler_name, "no handler registered, failing job");
        set_status(pool, job_id, JobStatus::Failed).await?;
        return Ok(());
    };

    sqlx::query("UPDATE async_ix_jobs SET status = 'running', started_at = COALESCE(started_at, ?), updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(pool)
        .await
        .map_err(|e| Error::Database(e))?;

    if cancel.is_cancelled() {
        set_status(pool, job_id, JobStatus::Pending).await?;
        return Ok(());
    }

    // Default overlap policy (§4.5/§9): a scheduled job materialized while its prior execution
    // was still running carries `skip_prior_running` in its own `pulse_state`. The runner short-
    // circuits on it instead of invoking the handler at all.
    let skip_prior_running = job
        .pulse_state
        .as_ref()
        .and_then(|s| s.get("skip_prior_running"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if skip_prior_running {
        info!(job_id, "skipping execution, prior scheduled-job execution still running");
        log_task(
            pool,
            job_id,
            None,
            None,
            "info",
            "skipped: prior execution of this scheduled job is still running",
            None,
        )
        .await?;
        sqlx::query("UPDATE async_ix_jobs SET status = 'completed', completed_at = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .bind(job_id)
            .execute(pool)
            .await
            .map_err(|e| Error::Database(e))?;
        return Ok(());
    }

    match handler.execute(&job, &cancel).await {
        Ok(()) => {
            sqlx::query("UPDATE async_ix_jobs SET status = 'completed', completed_at = ?, updated_at = ? WHERE id = ?")
                .bind(Utc::now().to_rfc3339())
                .bind(Utc::now().to_rfc3339())
                .bind(job_id)
                .execute(pool)
                .await
                .map_err(|e| Error::Database(e))?;
            clear_checkpoint(pool, job_id).await?;
            debug!(job_id, "job completed");
        }
        Err(e) if e.is_cancelled() => {
            set_status(pool, job_id, JobStatus::Cancelled).await?;
            clear_checkpoint(pool, job_id).await?;
        }
        Err(e) => {
            let max_retries = handler.max_retries().unwrap_or(DEFAULT_MAX_RETRIES);
            let retry_count = job.retry_count + 1;
            if retry_count as u32 > max_retries {
                warn!(job_id, error = %e, "retries exhausted, failing job");
                sqlx::query("UPDATE async_ix_jobs SET status = 'failed', error = ?, retry_count = ?, updated_at = ? WHERE id = ?")
                    .bind(e.to_string())
                    .bind(retry_count)
                    .bind(Utc::now().to_rfc3339())
                    .bind(job_id)
                    .execute(pool)
                    .await
                    .map_err(|e| Error::Database(e))?;
                clear_checkpoint(pool, job_id).await?;
            } else {
                let backoff = (BACKOFF_BASE * 2u32.pow(retry_count as u32 - 1)).min(BACKOFF_CEILING);
                warn!(job_id, retry_count, backoff_secs = backoff.as_secs(), error = %e, "job failed, will retry");
                sqlx::query("UPDATE async_ix_jobs SET status = 'pending', error = ?, retry_count = ?, updated_at = ? WHERE id = ?")
                    .bind(e.to_string())
                    .bind(retry_count)
                    .bind(Utc::now().to_rfc3339())
                    .bind(job_id)
                    .execute(pool)
                    .await
                    .map_err(|e| Error::Database(e))?;
                if let Some(checkpoint) = handler.checkpoint(&job).await {
                    save_checkpoint_raw(pool, job_id, &checkpoint.stage, checkpoint.progress).await?;
                }
                tokio::time::sleep(backoff).await;
            }
        }
    }

    Ok(())
}

async fn save_checkpoint_raw(pool: &SqlitePool, job_id: &str, stage: &str, progress: serde_json::Value) -> Result<()> {
    sqlx::query(
        "INSERT INTO job_checkpoints (job_id, stage, progress, updated_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(job_id) DO UPDATE SET stage = excluded.stage, progress = excluded.progress, \
         updated_at = excluded.updated_at",
    )
    .bind(job_id)
    .bind(stage)
    .bind(progress.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

/// Appends a structured task-log entry for a job. No truncation — TTL cleanup is external.
pub async fn log_task(
    pool: &SqlitePool,
    job_id: &str,
    stage: Option<&str>,
    task_id: Option<&str>,
    level: &str,
    message: &str,
    metadata: Option<serde_json::Value>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_logs (id, job_id, stage, task_id, timestamp, level, message, metadata) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(job_id)
    .bind(stage)
    .bind(task_id)
    .bind(Utc::now().to_rfc3339())
    .bind(level)
    .bind(message)
    .bind(metadata.map(|m| m.to_string()))
    .execute(pool)
    .await
    .map_err(|e| Error::Database(e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct AlwaysSucceeds;

    #[async_trait]
    impl crate::handler::Handler for AlwaysSucceeds {
        async fn execute(&self, _job: &Job, _cancel: &CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    struct FailsNTimes(Arc<AtomicU32>, u32);

    #[async_trait]
    impl crate::handler::Handler for FailsNTimes {
        async fn execute(&self, _job: &Job, _cancel: &CancellationToken) -> Result<()> {
            let attempt = self.0.fetch_add(1, Ordering::SeqCst);
            if attempt < self.1 {
                Err(Error::internal("simulated failure"))
            } else {
                Ok(())
            }
        }

        fn max_retries(&self) -> Option<u32> {
            Some(10)
        }
    }

    async fn fresh_pool() -> SqlitePool {
        let store = qntx_store::Store::in_memory().await.unwrap();
        store.pool()
    }

    #[tokio::test]
    async fn submitted_job_runs_to_completion() {
        let pool = fresh_pool().await;
        let mut handlers = HandlerRegistry::new();
        handlers.register("noop", Arc::new(AlwaysSucceeds));
        let jobs = AsyncJobs::new(pool.clone(), handlers, 2);

        let job_id = jobs.submit("test", "noop", serde_json::json!({})).await.unwrap();
        run_one(&pool, &jobs.handlers, &job_id, CancellationToken::new()).await.unwrap();

        let job = load_job(&pool, &job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn failed_job_is_requeued_as_pending_until_retries_exhausted() {
        let pool = fresh_pool().await;
        let mut handlers = HandlerRegistry::new();
        handlers.register("flaky", Arc::new(FailsNTimes(Arc::new(AtomicU32::new(0)), 1)));
        let jobs = AsyncJobs::new(pool.clone(), handlers, 2);

        let job_id = jobs.submit("test", "flaky", serde_json::json!({})).await.unwrap();
        run_one(&pool, &jobs.handlers, &job_id, CancellationToken::new()).await.unwrap();
        let job = load_job(&pool, &job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }

    struct NeverCalled;

    #[async_trait]
    impl crate::handler::Handler for NeverCalled {
        async fn execute(&self, _job: &Job, _cancel: &CancellationToken) -> Result<()> {
            panic!("handler must not run when pulse_state.skip_prior_running is set");
        }
    }

    #[tokio::test]
    async fn skip_prior_running_short_circuits_without_invoking_handler() {
        let pool = fresh_pool().await;
        let mut handlers = HandlerRegistry::new();
        handlers.register("noop", Arc::new(NeverCalled));
        let jobs = AsyncJobs::new(pool.clone(), handlers, 2);

        let job_id = jobs
            .submit_with_state("scheduled", "noop", serde_json::json!({}), Some(serde_json::json!({"skip_prior_running": true})))
            .await
            .unwrap();
        run_one(&pool, &jobs.handlers, &job_id, CancellationToken::new()).await.unwrap();

        let job = load_job(&pool, &job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let logs = jobs.list_task_logs(&job_id).await.unwrap();
        assert!(logs.iter().any(|l| l.message.contains("skipped")));
    }

    struct ObservesCancellation;

    #[async_trait]
    impl crate::handler::Handler for ObservesCancellation {
        async fn execute(&self, _job: &Job, cancel: &CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            Err(Error::Cancelled)
        }
    }

    #[tokio::test]
    async fn handler_observes_cancellation_mid_execution() {
        let pool = fresh_pool().await;
        let mut handlers = HandlerRegistry::new();
        handlers.register("cancellable", Arc::new(ObservesCancellation));
        let jobs = AsyncJobs::new(pool.clone(), handlers, 2);

        let job_id = jobs.submit("test", "cancellable", serde_json::json!({})).await.unwrap();
        let cancel = CancellationToken::new();

        // Start the job with a token that is *not yet* cancelled, so `run_one` passes its
        // up-front check and is blocked inside `handler.execute`; only then cancel it, proving
        // the handler — not just the runner's pre-dispatch check — observes the token firing.
        let run_pool = pool.clone();
        let run_handlers = jobs.handlers.clone();
        let run_job_id = job_id.clone();
        let run_cancel = cancel.clone();
        let run_task = tokio::spawn(async move { run_one(&run_pool, &run_handlers, &run_job_id, run_cancel).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        run_task.await.unwrap().unwrap();

        let job = load_job(&pool, &job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
