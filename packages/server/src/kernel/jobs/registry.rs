//! Job registry for deserializing and executing jobs.
//!
//! The registry maps job type strings (e.g., "scrape_task") to handlers that
//! reconstruct the typed job from JSON and run it. This lets the worker
//! dispatch claimed jobs to domain code without knowing the concrete types.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::warn;

use super::job::{ClaimedJob, CommandMeta, ErrorKind};
use crate::kernel::ServerDeps;

/// A handler's failure, classified for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    pub kind: ErrorKind,
}

impl JobFailure {
    pub fn retryable(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
            kind: ErrorKind::Retryable,
        }
    }

    pub fn non_retryable(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
            kind: ErrorKind::NonRetryable,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for JobFailure {}

pub type JobResult = Result<(), JobFailure>;

/// Type alias for the async handler function.
///
/// Handlers receive the claimed job and ServerDeps.
type BoxedHandler = Box<
    dyn Fn(ClaimedJob, Arc<ServerDeps>) -> Pin<Box<dyn Future<Output = JobResult> + Send>>
        + Send
        + Sync,
>;

/// Handler told about a job the queue gave up on without a recorded outcome.
type BoxedAbandonHandler = Box<
    dyn Fn(ClaimedJob, Arc<ServerDeps>) -> Pin<Box<dyn Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Registry that maps job type strings to handlers.
///
/// # Example
///
/// ```ignore
/// let mut registry = JobRegistry::new();
///
/// registry.register::<ScrapeTaskJob, _, _>(ScrapeTaskJob::JOB_TYPE, |job, ctx, deps| async move {
///     process_task(job, ctx, &deps).await
/// });
///
/// // Later, in JobWorker
/// registry.execute(claimed_job, deps.clone()).await?;
/// ```
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<&'static str, BoxedHandler>,
    abandon_handlers: HashMap<&'static str, BoxedAbandonHandler>,
}

/// Delivery details handed to a handler alongside its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    pub attempt: u32,
    pub max_attempts: u32,
}

impl JobContext {
    /// Whether a failure now dead-letters the job.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            abandon_handlers: HashMap::new(),
        }
    }

    /// Register a job type with its handler.
    ///
    /// A payload that fails to deserialize is reported as non-retryable.
    pub fn register<J, F, Fut>(&mut self, job_type: &'static str, handler: F)
    where
        J: CommandMeta + DeserializeOwned + Send + Sync + 'static,
        F: Fn(J, JobContext, Arc<ServerDeps>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |claimed, deps| {
            let handler = handler.clone();
            Box::pin(async move {
                let job: J = claimed.deserialize().map_err(JobFailure::non_retryable)?;
                let ctx = JobContext {
                    attempt: claimed.attempt,
                    max_attempts: claimed.max_attempts,
                };
                handler(job, ctx, deps).await
            })
        });

        self.handlers.insert(job_type, boxed);
    }

    /// Register cleanup for jobs of this type that were dead-lettered
    /// because their lease expired on the final attempt.
    pub fn on_abandoned<J, F, Fut>(&mut self, job_type: &'static str, handler: F)
    where
        J: CommandMeta + DeserializeOwned + Send + Sync + 'static,
        F: Fn(J, JobContext, Arc<ServerDeps>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: BoxedAbandonHandler = Box::new(move |claimed, deps| {
            let handler = handler.clone();
            Box::pin(async move {
                let job: J = match claimed.deserialize() {
                    Ok(job) => job,
                    Err(e) => {
                        warn!(job_id = %claimed.id, error = %e, "abandoned job has unreadable payload");
                        return;
                    }
                };
                let ctx = JobContext {
                    attempt: claimed.attempt,
                    max_attempts: claimed.max_attempts,
                };
                handler(job, ctx, deps).await
            })
        });

        self.abandon_handlers.insert(job_type, boxed);
    }

    /// Run the abandon handler for a job, if its type has one.
    pub async fn abandon(&self, job: ClaimedJob, deps: Arc<ServerDeps>) {
        if let Some(handler) = self.abandon_handlers.get(job.job_type.as_str()) {
            handler(job, deps).await;
        }
    }

    /// Execute a claimed job using its registered handler.
    pub async fn execute(&self, job: ClaimedJob, deps: Arc<ServerDeps>) -> JobResult {
        let handler = self.handlers.get(job.job_type.as_str()).ok_or_else(|| {
            JobFailure::non_retryable(format!("unknown job type: {}", job.job_type))
        })?;

        handler(job, deps).await
    }

    /// Check if a job type is registered.
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Get all registered job types.
    pub fn registered_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    use crate::common::JobId;
    use crate::kernel::test_dependencies::TestDependencies;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestJob {
        pub name: String,
    }

    impl CommandMeta for TestJob {
        fn command_type(&self) -> &'static str {
            "test_job"
        }
    }

    fn claimed(job_type: &str, payload: serde_json::Value) -> ClaimedJob {
        ClaimedJob {
            id: JobId::new(),
            job_type: job_type.to_string(),
            payload,
            attempt: 1,
            max_attempts: 3,
        }
    }

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register::<TestJob, _, _>("test_job", |job, ctx, _deps| async move {
            if job.name == "fail" {
                Err(JobFailure::retryable(format!("failed on attempt {}", ctx.attempt)))
            } else {
                Ok(())
            }
        });
        registry
    }

    #[test]
    fn test_register_and_check() {
        let registry = registry();
        assert!(registry.is_registered("test_job"));
        assert!(!registry.is_registered("unknown_job"));
        assert_eq!(registry.registered_types(), vec!["test_job"]);
    }

    #[tokio::test]
    async fn test_execute_dispatches_by_type() {
        let deps = TestDependencies::new().into_server_deps();
        let registry = registry();

        let ok = registry
            .execute(claimed("test_job", serde_json::json!({ "name": "ok" })), deps.clone())
            .await;
        assert!(ok.is_ok());

        let err = registry
            .execute(claimed("test_job", serde_json::json!({ "name": "fail" })), deps)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Retryable);
        assert_eq!(err.message, "failed on attempt 1");
    }

    #[tokio::test]
    async fn test_abandon_runs_only_registered_cleanup() {
        let deps = TestDependencies::new().into_server_deps();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = registry();
        let recorder = seen.clone();
        registry.on_abandoned::<TestJob, _, _>("test_job", move |job, ctx, _deps| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push((job.name, ctx.attempt));
            }
        });

        registry
            .abandon(claimed("test_job", serde_json::json!({ "name": "lost" })), deps.clone())
            .await;
        registry.abandon(claimed("mystery", serde_json::json!({})), deps).await;

        assert_eq!(*seen.lock().unwrap(), vec![("lost".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_unknown_type_and_bad_payload_are_permanent() {
        let deps = TestDependencies::new().into_server_deps();
        let registry = registry();

        let unknown = registry
            .execute(claimed("mystery", serde_json::json!({})), deps.clone())
            .await
            .unwrap_err();
        assert_eq!(unknown.kind, ErrorKind::NonRetryable);

        let malformed = registry
            .execute(claimed("test_job", serde_json::json!({ "nope": 1 })), deps)
            .await
            .unwrap_err();
        assert_eq!(malformed.kind, ErrorKind::NonRetryable);
    }
}
