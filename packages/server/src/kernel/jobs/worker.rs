//! Job worker service for processing background jobs.
//!
//! The `JobWorker` is a long-running service that:
//! - Claims ready jobs, never more than it has free concurrency slots for
//! - Dispatches each to its handler via the `JobRegistry`
//! - Heartbeats the lease of every running job
//! - Marks jobs succeeded/failed (the queue owns retry and dead-lettering)
//! - Prunes the queue periodically
//!
//! # Architecture
//!
//! ```text
//! JobWorker::run(shutdown)
//!     │
//!     ├─► claim(free permits)
//!     ├─► JoinSet: per job
//!     │       ├─► heartbeat task
//!     │       ├─► JobRegistry.execute(job, deps)
//!     │       └─► mark_succeeded / mark_failed
//!     └─► on shutdown: stop claiming, drain (bounded), release leftovers
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{ClaimedJob, ErrorKind, FailureOutcome};
use super::queue::JobQueue;
use super::registry::SharedJobRegistry;
use crate::common::JobId;
use crate::kernel::ServerDeps;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Maximum number of jobs running at once
    pub concurrency: usize,
    /// How long to wait when no jobs are available
    pub poll_interval: Duration,
    /// How often to send heartbeats for running jobs
    pub heartbeat_interval: Duration,
    /// How often to apply the queue's retention policy
    pub prune_interval: Duration,
    /// How long shutdown waits for in-flight jobs
    pub drain_timeout: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(20),
            prune_interval: Duration::from_secs(5 * 60),
            drain_timeout: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// A job worker that processes jobs from a queue.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    registry: SharedJobRegistry,
    deps: Arc<ServerDeps>,
    config: JobWorkerConfig,
    /// Jobs currently executing, for release on a timed-out drain
    running_jobs: Arc<RwLock<HashSet<JobId>>>,
}

impl JobWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: SharedJobRegistry,
        deps: Arc<ServerDeps>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            deps,
            config,
            running_jobs: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Run until `shutdown` is cancelled, then drain in-flight jobs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        info!(
            worker_id = %self.config.worker_id,
            concurrency,
            "job worker starting"
        );

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut last_prune: Option<Instant> = None;

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(joined);
            }

            if shutdown.is_cancelled() {
                break;
            }

            if last_prune.map_or(true, |at| at.elapsed() >= self.config.prune_interval) {
                self.prune().await;
                last_prune = Some(Instant::now());
            }

            let free = permits.available_permits();
            if free == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    Some(joined) = in_flight.join_next() => log_join_error(joined),
                }
                continue;
            }

            let jobs = match self.queue.claim(&self.config.worker_id, free).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    Some(joined) = in_flight.join_next() => log_join_error(joined),
                }
                continue;
            }

            debug!(count = jobs.len(), "claimed jobs");

            for job in jobs {
                // Claims never exceed free permits, so this does not wait.
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "concurrency limiter closed");
                        continue;
                    }
                };

                self.running_jobs.write().await.insert(job.id);
                let runner = JobRun {
                    queue: self.queue.clone(),
                    registry: self.registry.clone(),
                    deps: self.deps.clone(),
                    heartbeat_interval: self.config.heartbeat_interval,
                    running_jobs: self.running_jobs.clone(),
                };
                in_flight.spawn(async move {
                    runner.process(job).await;
                    drop(permit);
                });
            }
        }

        self.drain(in_flight).await;
        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    async fn prune(&self) {
        let report = match self.queue.prune().await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "failed to prune job queue");
                return;
            }
        };
        if report.is_empty() {
            return;
        }

        debug!(
            succeeded_removed = report.succeeded_removed,
            dead_letters_removed = report.dead_letters_removed,
            abandoned = report.abandoned.len(),
            "queue pruned"
        );
        for job in report.abandoned {
            self.registry.abandon(job, self.deps.clone()).await;
        }
    }

    /// Wait for in-flight jobs; past the deadline, abort them and hand their
    /// jobs back to the queue.
    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }

        info!(count = in_flight.len(), "waiting for running jobs to complete");

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join_error(joined);
            }
        })
        .await;

        if drained.is_ok() {
            return;
        }

        warn!(
            count = in_flight.len(),
            timeout_secs = self.config.drain_timeout.as_secs(),
            "drain timed out, aborting running jobs"
        );
        in_flight.shutdown().await;

        let leftovers: Vec<JobId> = self.running_jobs.write().await.drain().collect();
        for job_id in leftovers {
            if let Err(e) = self
                .queue
                .mark_failed(job_id, "worker shut down before the job finished", ErrorKind::Shutdown)
                .await
            {
                error!(job_id = %job_id, error = %e, "failed to release job on shutdown");
            }
        }
    }
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "job task panicked");
        }
    }
}

/// Everything one spawned job execution needs.
struct JobRun {
    queue: Arc<dyn JobQueue>,
    registry: SharedJobRegistry,
    deps: Arc<ServerDeps>,
    heartbeat_interval: Duration,
    running_jobs: Arc<RwLock<HashSet<JobId>>>,
}

impl JobRun {
    async fn process(self, job: ClaimedJob) {
        let job_id = job.id;
        let job_type = job.job_type.clone();
        let attempt = job.attempt;
        debug!(job_id = %job_id, job_type = %job_type, attempt, "job started");

        let result = self.execute_with_heartbeat(job).await;

        match result {
            Ok(()) => {
                debug!(job_id = %job_id, job_type = %job_type, "job succeeded");
                if let Err(e) = self.queue.mark_succeeded(job_id).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job as succeeded");
                }
            }
            Err(failure) => {
                match self
                    .queue
                    .mark_failed(job_id, &failure.message, failure.kind)
                    .await
                {
                    Ok(FailureOutcome::Retrying { delay, .. }) => warn!(
                        job_id = %job_id,
                        job_type = %job_type,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %failure.message,
                        "job failed, will retry"
                    ),
                    Ok(FailureOutcome::DeadLettered { .. }) => error!(
                        job_id = %job_id,
                        job_type = %job_type,
                        attempt,
                        kind = %failure.kind,
                        error = %failure.message,
                        "job dead-lettered"
                    ),
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "failed to mark job as failed")
                    }
                }
            }
        }

        self.running_jobs.write().await.remove(&job_id);
    }

    /// Execute a job with periodic heartbeats.
    async fn execute_with_heartbeat(&self, job: ClaimedJob) -> super::registry::JobResult {
        let job_id = job.id;
        let queue = self.queue.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let stop = CancellationToken::new();

        // Spawn heartbeat task
        let heartbeat_stop = stop.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = heartbeat_stop.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.heartbeat(job_id).await {
                            warn!(job_id = %job_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        });
        let _stop_on_drop = stop.clone().drop_guard();

        let result = self.registry.execute(job, self.deps.clone()).await;

        // Stop heartbeat
        stop.cancel();
        let _ = heartbeat_handle.await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{
        CommandMeta, InMemoryJobQueue, JobFailure, JobQueueExt, JobRegistry, JobStatus,
        QueueOptions,
    };
    use crate::kernel::test_dependencies::TestDependencies;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct SleepJob {
        millis: u64,
        fail: bool,
    }

    impl CommandMeta for SleepJob {
        fn command_type(&self) -> &'static str {
            "sleep"
        }
    }

    #[derive(Default)]
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    fn registry(gauge: Arc<Gauge>) -> SharedJobRegistry {
        let mut registry = JobRegistry::new();
        registry.register::<SleepJob, _, _>("sleep", move |job, _ctx, _deps| {
            let gauge = gauge.clone();
            async move {
                let now = gauge.running.fetch_add(1, Ordering::SeqCst) + 1;
                gauge.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(job.millis)).await;
                gauge.running.fetch_sub(1, Ordering::SeqCst);
                if job.fail {
                    Err(JobFailure::retryable("sleep failed"))
                } else {
                    Ok(())
                }
            }
        });
        Arc::new(registry)
    }

    fn config(concurrency: usize) -> JobWorkerConfig {
        JobWorkerConfig {
            concurrency,
            poll_interval: Duration::from_millis(50),
            ..JobWorkerConfig::with_worker_id("test-worker")
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = JobWorkerConfig::default();
        assert_eq!(config.concurrency, 5);
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_jobs_within_concurrency_cap() {
        let queue = Arc::new(InMemoryJobQueue::new(QueueOptions::default()));
        for _ in 0..6 {
            queue
                .enqueue_command(&SleepJob {
                    millis: 1_000,
                    fail: false,
                })
                .await
                .unwrap();
        }

        let gauge = Arc::new(Gauge::default());
        let worker = JobWorker::new(
            queue.clone(),
            registry(gauge.clone()),
            TestDependencies::new().into_server_deps(),
            config(2),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert!(queue
            .jobs()
            .iter()
            .all(|job| job.status == JobStatus::Succeeded));
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_retried_then_dead_lettered() {
        let queue = Arc::new(InMemoryJobQueue::new(QueueOptions::default()));
        let id = queue
            .enqueue_command(&SleepJob {
                millis: 10,
                fail: true,
            })
            .await
            .unwrap()
            .job_id();

        let worker = JobWorker::new(
            queue.clone(),
            registry(Arc::default()),
            TestDependencies::new().into_server_deps(),
            config(1),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        // 2s + 4s of backoff between the three attempts
        tokio::time::sleep(Duration::from_secs(30)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let job = queue.job(id).unwrap();
        assert_eq!(job.status, JobStatus::DeadLetter);
        assert_eq!(job.attempt, 3);
        assert_eq!(job.error_message.as_deref(), Some("sleep failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_job() {
        let queue = Arc::new(InMemoryJobQueue::new(QueueOptions::default()));
        let id = queue
            .enqueue_command(&SleepJob {
                millis: 5_000,
                fail: false,
            })
            .await
            .unwrap()
            .job_id();

        let worker = JobWorker::new(
            queue.clone(),
            registry(Arc::default()),
            TestDependencies::new().into_server_deps(),
            config(1),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.job(id).unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_hands_job_back() {
        let queue = Arc::new(InMemoryJobQueue::new(QueueOptions::default()));
        let id = queue
            .enqueue_command(&SleepJob {
                millis: 120_000,
                fail: false,
            })
            .await
            .unwrap()
            .job_id();

        let worker = JobWorker::new(
            queue.clone(),
            registry(Arc::default()),
            TestDependencies::new().into_server_deps(),
            JobWorkerConfig {
                drain_timeout: Duration::from_secs(1),
                ..config(1)
            },
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let job = queue.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.error_kind, Some(ErrorKind::Shutdown));
    }
}
