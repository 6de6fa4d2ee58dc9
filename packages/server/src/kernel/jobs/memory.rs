//! In-process job queue.
//!
//! Same delivery semantics as [`PostgresJobQueue`](super::PostgresJobQueue),
//! kept in a map. Time comes from `tokio::time`, so tests running with a
//! paused clock see backoff delays and lease expiry advance instantly.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::job::{
    ClaimedJob, EnqueueResult, ErrorKind, FailureOutcome, JobSpec, JobStatus, PruneReport,
};
use super::queue::{failure_outcome, JobQueue, QueueOptions};
use crate::common::JobId;

#[derive(Debug, Clone)]
struct StoredJob {
    seq: u64,
    job_type: String,
    payload: serde_json::Value,
    idempotency_key: Option<String>,
    status: JobStatus,
    attempt: u32,
    max_attempts: u32,
    run_at: Instant,
    lease_expires_at: Option<Instant>,
    error_message: Option<String>,
    error_kind: Option<ErrorKind>,
    finished_at: Option<Instant>,
}

/// Read-only view of a job, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    jobs: HashMap<JobId, StoredJob>,
}

pub struct InMemoryJobQueue {
    options: QueueOptions,
    state: Mutex<State>,
}

impl InMemoryJobQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory job queue lock poisoned"))
    }

    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        let state = self.lock().ok()?;
        state.jobs.get(&id).map(|job| snapshot(id, job))
    }

    /// All jobs in enqueue order
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut jobs: Vec<_> = state.jobs.iter().collect();
        jobs.sort_by_key(|(_, job)| job.seq);
        jobs.into_iter().map(|(id, job)| snapshot(*id, job)).collect()
    }

    /// True once no job is pending or running.
    pub fn is_idle(&self) -> bool {
        self.jobs()
            .iter()
            .all(|job| matches!(job.status, JobStatus::Succeeded | JobStatus::DeadLetter))
    }
}

fn snapshot(id: JobId, job: &StoredJob) -> JobSnapshot {
    JobSnapshot {
        id,
        job_type: job.job_type.clone(),
        status: job.status,
        attempt: job.attempt,
        max_attempts: job.max_attempts,
        error_message: job.error_message.clone(),
        error_kind: job.error_kind,
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueResult> {
        let mut state = self.lock()?;

        if let Some(key) = &spec.idempotency_key {
            let existing = state
                .jobs
                .iter()
                .find(|(_, job)| job.idempotency_key.as_ref() == Some(key))
                .map(|(id, _)| *id);
            if let Some(id) = existing {
                return Ok(EnqueueResult::Duplicate(id));
            }
        }

        let id = JobId::new();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            id,
            StoredJob {
                seq,
                job_type: spec.job_type,
                payload: spec.payload,
                idempotency_key: spec.idempotency_key,
                status: JobStatus::Pending,
                attempt: 0,
                max_attempts: spec.max_attempts.unwrap_or(self.options.max_attempts).max(1),
                run_at: Instant::now(),
                lease_expires_at: None,
                error_message: None,
                error_kind: None,
                finished_at: None,
            },
        );

        debug!(job_id = %id, "job enqueued");
        Ok(EnqueueResult::Created(id))
    }

    async fn claim(&self, worker_id: &str, limit: usize) -> Result<Vec<ClaimedJob>> {
        let now = Instant::now();
        let lease = self.options.lease_duration;
        let mut state = self.lock()?;

        let mut ready: Vec<(JobId, Instant, u64)> = state
            .jobs
            .iter()
            .filter(|(_, job)| match job.status {
                JobStatus::Pending => job.run_at <= now,
                JobStatus::Running => {
                    job.lease_expires_at.is_some_and(|at| at < now) && job.attempt < job.max_attempts
                }
                _ => false,
            })
            .map(|(id, job)| (*id, job.run_at, job.seq))
            .collect();
        ready.sort_by_key(|(_, run_at, seq)| (*run_at, *seq));
        ready.truncate(limit);

        let mut claimed = Vec::with_capacity(ready.len());
        for (id, _, _) in ready {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JobStatus::Running;
                job.attempt += 1;
                job.lease_expires_at = Some(now + lease);
                claimed.push(ClaimedJob {
                    id,
                    job_type: job.job_type.clone(),
                    payload: job.payload.clone(),
                    attempt: job.attempt,
                    max_attempts: job.max_attempts,
                });
                debug!(job_id = %id, worker_id = %worker_id, attempt = job.attempt, "job claimed");
            }
        }

        Ok(claimed)
    }

    async fn heartbeat(&self, job_id: JobId) -> Result<()> {
        let lease = self.options.lease_duration;
        let mut state = self.lock()?;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Running {
                job.lease_expires_at = Some(Instant::now() + lease);
            }
        }
        Ok(())
    }

    async fn mark_succeeded(&self, job_id: JobId) -> Result<()> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("job {} not found", job_id))?;
        job.status = JobStatus::Succeeded;
        job.lease_expires_at = None;
        job.error_message = None;
        job.error_kind = None;
        job.finished_at = Some(Instant::now());
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        kind: ErrorKind,
    ) -> Result<FailureOutcome> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("job {} not found", job_id))?;

        let outcome = failure_outcome(&self.options, job.attempt, job.max_attempts, kind);
        job.error_message = Some(error.to_string());
        job.error_kind = Some(kind);
        job.lease_expires_at = None;

        match outcome {
            FailureOutcome::Retrying { delay, .. } => {
                if kind == ErrorKind::Shutdown {
                    job.attempt = job.attempt.saturating_sub(1);
                }
                job.status = JobStatus::Pending;
                job.run_at = Instant::now() + delay;
            }
            FailureOutcome::DeadLettered { .. } => {
                job.status = JobStatus::DeadLetter;
                job.finished_at = Some(Instant::now());
            }
        }

        Ok(outcome)
    }

    async fn prune(&self) -> Result<PruneReport> {
        let now = Instant::now();
        let retention = self.options.retention;
        let mut state = self.lock()?;
        let mut report = PruneReport::default();

        for (id, job) in state.jobs.iter_mut() {
            let abandoned = job.status == JobStatus::Running
                && job.lease_expires_at.is_some_and(|at| at < now)
                && job.attempt >= job.max_attempts;
            if abandoned {
                job.status = JobStatus::DeadLetter;
                job.lease_expires_at = None;
                job.error_message
                    .get_or_insert_with(|| "lease expired on final attempt".to_string());
                job.error_kind.get_or_insert(ErrorKind::Retryable);
                job.finished_at = Some(now);
                report.abandoned.push(ClaimedJob {
                    id: *id,
                    job_type: job.job_type.clone(),
                    payload: job.payload.clone(),
                    attempt: job.attempt,
                    max_attempts: job.max_attempts,
                });
            }
        }

        let expired = |finished_at: Option<Instant>, max_age| {
            finished_at.is_some_and(|at| now.saturating_duration_since(at) > max_age)
        };

        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.status == JobStatus::Succeeded && expired(job.finished_at, retention.succeeded_max_age))
        });
        report.succeeded_removed += (before - state.jobs.len()) as u64;

        let mut succeeded: Vec<(JobId, Option<Instant>, u64)> = state
            .jobs
            .iter()
            .filter(|(_, job)| job.status == JobStatus::Succeeded)
            .map(|(id, job)| (*id, job.finished_at, job.seq))
            .collect();
        // Newest first; keep the head.
        succeeded.sort_by(|a, b| (b.1, b.2).cmp(&(a.1, a.2)));
        for (id, _, _) in succeeded.into_iter().skip(retention.succeeded_max_count) {
            state.jobs.remove(&id);
            report.succeeded_removed += 1;
        }

        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.status == JobStatus::DeadLetter
                && expired(job.finished_at, retention.dead_letter_max_age))
        });
        report.dead_letters_removed = (before - state.jobs.len()) as u64;

        Ok(report)
    }
}
