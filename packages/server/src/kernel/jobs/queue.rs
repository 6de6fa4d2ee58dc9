//! Job queue trait and its PostgreSQL implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::job::{
    ClaimedJob, CommandMeta, EnqueueResult, ErrorKind, FailureOutcome, JobSpec, PruneReport,
    RetentionPolicy,
};
use crate::common::JobId;
use crate::kernel::retry::BackoffPolicy;

/// Queue-wide delivery settings.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Attempts per job unless the command overrides it
    pub max_attempts: u32,
    /// Delay after failed attempt `n` is `backoff.delay_for(n)`
    pub backoff: BackoffPolicy,
    pub lease_duration: Duration,
    pub retention: RetentionPolicy,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::exponential(Duration::from_millis(2000)),
            lease_duration: Duration::from_secs(60),
            retention: RetentionPolicy::default(),
        }
    }
}

/// Trait for job queue operations.
///
/// At-least-once: a job is redelivered after a retryable failure or when its
/// lease expires, until it succeeds or runs out of attempts.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for immediate execution.
    ///
    /// If the `JobSpec` carries an idempotency key that already exists, returns
    /// `EnqueueResult::Duplicate` with the existing job ID.
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult>;

    /// Claim up to `limit` ready jobs, starting a new attempt on each.
    async fn claim(&self, worker_id: &str, limit: usize) -> Result<Vec<ClaimedJob>>;

    /// Extend the lease for a running job.
    async fn heartbeat(&self, job_id: JobId) -> Result<()>;

    async fn mark_succeeded(&self, job_id: JobId) -> Result<()>;

    /// Record a failed attempt; reschedules with backoff or dead-letters.
    async fn mark_failed(&self, job_id: JobId, error: &str, kind: ErrorKind)
        -> Result<FailureOutcome>;

    /// Apply the retention policy. Jobs dead-lettered because their final
    /// lease expired are returned so their owners can be told.
    async fn prune(&self) -> Result<PruneReport>;
}

/// Typed enqueue for anything implementing [`CommandMeta`].
#[async_trait]
pub trait JobQueueExt {
    async fn enqueue_command<C>(&self, command: &C) -> Result<EnqueueResult>
    where
        C: Serialize + CommandMeta + Sync;
}

#[async_trait]
impl<Q: JobQueue + ?Sized> JobQueueExt for Q {
    async fn enqueue_command<C>(&self, command: &C) -> Result<EnqueueResult>
    where
        C: Serialize + CommandMeta + Sync,
    {
        self.enqueue(JobSpec::from_command(command)?).await
    }
}

/// Decide what happens to a job whose attempt just failed.
pub(crate) fn failure_outcome(
    options: &QueueOptions,
    attempt: u32,
    max_attempts: u32,
    kind: ErrorKind,
) -> FailureOutcome {
    match kind {
        // Interrupted, not failed: run again right away.
        ErrorKind::Shutdown => FailureOutcome::Retrying {
            attempt,
            delay: Duration::ZERO,
        },
        ErrorKind::Retryable if attempt < max_attempts => FailureOutcome::Retrying {
            attempt,
            delay: options.backoff.delay_for(attempt),
        },
        _ => FailureOutcome::DeadLettered { attempt },
    }
}

/// PostgreSQL-backed job queue implementation.
pub struct PostgresJobQueue {
    pool: PgPool,
    options: QueueOptions,
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    id: JobId,
    job_type: String,
    payload: serde_json::Value,
    attempt: i32,
    max_attempts: i32,
}

impl From<ClaimedRow> for ClaimedJob {
    fn from(row: ClaimedRow) -> Self {
        Self {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            attempt: row.attempt.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
        }
    }
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool, options: QueueOptions) -> Self {
        Self { pool, options }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    fn lease_ms(&self) -> String {
        self.options.lease_duration.as_millis().to_string()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<JobId>> {
        let id = sqlx::query_scalar::<_, JobId>("SELECT id FROM jobs WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult> {
        let max_attempts = spec.max_attempts.unwrap_or(self.options.max_attempts).max(1) as i32;

        // The unique index on idempotency_key makes concurrent duplicates safe.
        let inserted = sqlx::query_scalar::<_, JobId>(
            r#"
            INSERT INTO jobs (id, job_type, payload, idempotency_key, max_attempts)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(JobId::new())
        .bind(&spec.job_type)
        .bind(&spec.payload)
        .bind(&spec.idempotency_key)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert job")?;

        if let Some(id) = inserted {
            debug!(job_id = %id, job_type = %spec.job_type, "job enqueued");
            return Ok(EnqueueResult::Created(id));
        }

        let key = spec.idempotency_key.as_deref().unwrap_or_default();
        let existing = self
            .find_by_idempotency_key(key)
            .await?
            .with_context(|| format!("job with idempotency key {} vanished", key))?;
        debug!(job_id = %existing, idempotency_key = %key, "duplicate enqueue ignored");
        Ok(EnqueueResult::Duplicate(existing))
    }

    async fn claim(&self, worker_id: &str, limit: usize) -> Result<Vec<ClaimedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE
                    (status = 'pending' AND run_at <= NOW())
                    OR (status = 'running' AND lease_expires_at < NOW() AND attempt < max_attempts)
                ORDER BY run_at, created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET
                status = 'running',
                attempt = attempt + 1,
                lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                worker_id = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING id, job_type, payload, attempt, max_attempts
            "#,
        )
        .bind(limit as i64)
        .bind(self.lease_ms())
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to claim jobs")?;

        Ok(rows.into_iter().map(ClaimedJob::from).collect())
    }

    async fn heartbeat(&self, job_id: JobId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(self.lease_ms())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_succeeded(&self, job_id: JobId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                lease_expires_at = NULL,
                error_message = NULL,
                error_kind = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        kind: ErrorKind,
    ) -> Result<FailureOutcome> {
        let mut tx = self.pool.begin().await?;

        let (attempt, max_attempts) = sqlx::query_as::<_, (i32, i32)>(
            "SELECT attempt, max_attempts FROM jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("job {} not found", job_id))?;

        let outcome = failure_outcome(
            &self.options,
            attempt.max(0) as u32,
            max_attempts.max(0) as u32,
            kind,
        );

        match outcome {
            FailureOutcome::Retrying { delay, .. } => {
                let retry_at = Utc::now() + chrono::Duration::from_std(delay)?;
                // A shutdown interruption hands its attempt back.
                let refund = i32::from(kind == ErrorKind::Shutdown);
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        attempt = GREATEST(attempt - $1, 0),
                        run_at = $2,
                        lease_expires_at = NULL,
                        worker_id = NULL,
                        error_message = $3,
                        error_kind = $4,
                        updated_at = NOW()
                    WHERE id = $5
                    "#,
                )
                .bind(refund)
                .bind(retry_at)
                .bind(error)
                .bind(kind)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            FailureOutcome::DeadLettered { .. } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'dead_letter',
                        lease_expires_at = NULL,
                        error_message = $1,
                        error_kind = $2,
                        finished_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(error)
                .bind(kind)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn prune(&self) -> Result<PruneReport> {
        let retention = &self.options.retention;

        let abandoned: Vec<ClaimedJob> = sqlx::query_as::<_, ClaimedRow>(
            r#"
            UPDATE jobs
            SET status = 'dead_letter',
                error_message = COALESCE(error_message, 'lease expired on final attempt'),
                error_kind = COALESCE(error_kind, 'retryable'),
                finished_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND lease_expires_at < NOW()
              AND attempt >= max_attempts
            RETURNING id, job_type, payload, attempt, max_attempts
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ClaimedJob::from)
        .collect();

        let succeeded_aged = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status = 'succeeded'
              AND finished_at < NOW() - ($1 || ' seconds')::INTERVAL
            "#,
        )
        .bind(retention.succeeded_max_age.as_secs().to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let succeeded_overflow = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'succeeded'
                ORDER BY finished_at DESC
                OFFSET $1
            )
            "#,
        )
        .bind(retention.succeeded_max_count as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let dead_letters_removed = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status = 'dead_letter'
              AND finished_at < NOW() - ($1 || ' seconds')::INTERVAL
            "#,
        )
        .bind(retention.dead_letter_max_age.as_secs().to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let report = PruneReport {
            succeeded_removed: succeeded_aged + succeeded_overflow,
            dead_letters_removed,
            abandoned,
        };

        for job in &report.abandoned {
            warn!(job_id = %job.id, job_type = %job.job_type, "dead-lettered job with expired final lease");
        }
        if !report.is_empty() {
            info!(
                succeeded_removed = report.succeeded_removed,
                dead_letters_removed = report.dead_letters_removed,
                "pruned job queue"
            );
        }

        Ok(report)
    }
}
