//! The worker pipeline for one task: fetch, extract, answer, persist.
//!
//! Every failure is written onto the task before it is returned, so the
//! record reflects the latest attempt while queue retries continue.

use thiserror::Error;
use tracing::{error, info, warn};

use super::answer::{SummarizeError, Summarizer};
use crate::common::TaskId;
use crate::domains::tasks::jobs::ScrapeTaskJob;
use crate::domains::tasks::machines::TaskUpdate;
use crate::domains::tasks::models::{Task, TaskStatus};
use crate::domains::tasks::store::TaskStoreError;
use crate::kernel::jobs::JobContext;
use crate::kernel::scraper::ContentError;
use crate::kernel::ServerDeps;

#[derive(Debug, Error)]
pub enum ProcessTaskError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Summarize(#[from] SummarizeError),

    #[error(transparent)]
    Store(#[from] TaskStoreError),
}

impl ProcessTaskError {
    /// Whether the queue should deliver the job again.
    ///
    /// Every fetch or answering failure is retried, including blocked
    /// fetches. A task that no longer exists, or that cannot legally
    /// re-enter processing, never will.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProcessTaskError::Store(TaskStoreError::NotFound(_))
                | ProcessTaskError::Store(TaskStoreError::IllegalTransition(_))
        )
    }
}

#[derive(Debug)]
pub enum TaskOutcome {
    Completed(Task),
    /// Redelivery of a job whose task already completed
    AlreadyCompleted,
}

pub async fn process_task(
    job: &ScrapeTaskJob,
    ctx: JobContext,
    deps: &ServerDeps,
) -> Result<TaskOutcome, ProcessTaskError> {
    let task_id = job.task_id;

    let current = deps.tasks.get(task_id).await?;
    if current.status == TaskStatus::Completed {
        info!(task_id = %task_id, attempt = ctx.attempt, "task already completed, skipping");
        return Ok(TaskOutcome::AlreadyCompleted);
    }

    deps.tasks.update(task_id, TaskUpdate::Processing).await?;
    info!(
        task_id = %task_id,
        attempt = ctx.attempt,
        max_attempts = ctx.max_attempts,
        url = %job.url,
        "processing task"
    );

    let content = match deps.content.fetch(&job.url).await {
        Ok(content) => content,
        Err(e) => return Err(fail_task(deps, task_id, ctx, e.into()).await),
    };

    let scraped = TaskUpdate::ContentScraped {
        content: content.clone(),
    };
    if let Err(e) = deps.tasks.update(task_id, scraped).await {
        return Err(fail_task(deps, task_id, ctx, e.into()).await);
    }
    info!(task_id = %task_id, content_len = content.len(), "content scraped");

    let summarizer = Summarizer::new(deps.ai.clone(), deps.summarize_timeout);
    let answer = match summarizer.answer(&content, &job.question).await {
        Ok(answer) => answer,
        Err(e) => return Err(fail_task(deps, task_id, ctx, e.into()).await),
    };

    let task = match deps.tasks.update(task_id, TaskUpdate::Completed { answer }).await {
        Ok(task) => task,
        Err(e) => return Err(fail_task(deps, task_id, ctx, e.into()).await),
    };
    info!(task_id = %task_id, "task completed");

    Ok(TaskOutcome::Completed(task))
}

/// Persist the failure onto the task, then hand the error back.
///
/// Best effort: a store that cannot record the failure only gets logged.
async fn fail_task(
    deps: &ServerDeps,
    task_id: TaskId,
    ctx: JobContext,
    err: ProcessTaskError,
) -> ProcessTaskError {
    if ctx.is_final_attempt() || !err.is_retryable() {
        error!(task_id = %task_id, attempt = ctx.attempt, error = %err, "task failed for good");
    } else {
        warn!(task_id = %task_id, attempt = ctx.attempt, error = %err, "task failed, will retry");
    }

    let update = TaskUpdate::Failed {
        error: err.to_string(),
    };
    if let Err(store_err) = deps.tasks.update(task_id, update).await {
        error!(task_id = %task_id, error = %store_err, "failed to record task failure");
    }

    err
}

/// Mark the task failed after its job was dead-lettered without reporting
/// an outcome (the worker running it stopped heartbeating).
pub async fn abandon_task(job: &ScrapeTaskJob, ctx: JobContext, deps: &ServerDeps) {
    let update = TaskUpdate::Failed {
        error: format!(
            "processing stopped responding on attempt {} of {}",
            ctx.attempt, ctx.max_attempts
        ),
    };
    match deps.tasks.update(job.task_id, update).await {
        Ok(_) => warn!(task_id = %job.task_id, "abandoned task marked failed"),
        Err(e) => warn!(task_id = %job.task_id, error = %e, "could not mark abandoned task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::domains::tasks::store::{InMemoryTaskStore, TaskStore};
    use crate::kernel::scraper::{FetchError, FetchErrorKind};
    use crate::kernel::test_dependencies::{MockAI, ScriptedFetcher, TestDependencies};

    const RICH_HTML: &str = r#"<html><head><title>Guide</title></head><body>
        <main>The answer to the ultimate question of life, the universe, and everything
        is forty-two, as computed by Deep Thought over seven and a half million years.</main>
        </body></html>"#;

    fn ctx() -> JobContext {
        JobContext {
            attempt: 1,
            max_attempts: 3,
        }
    }

    async fn job_for(deps: &TestDependencies) -> ScrapeTaskJob {
        let task = deps
            .tasks
            .create("https://example.com", "What is the answer?")
            .await
            .unwrap();
        ScrapeTaskJob {
            task_id: task.id,
            url: task.url,
            question: task.question,
        }
    }

    /// Delegates to the in-memory store but rejects one kind of update.
    struct FailingUpdates {
        inner: Arc<InMemoryTaskStore>,
        rejects: fn(&TaskUpdate) -> bool,
    }

    #[async_trait]
    impl TaskStore for FailingUpdates {
        async fn create(&self, url: &str, question: &str) -> Result<Task, TaskStoreError> {
            self.inner.create(url, question).await
        }

        async fn get(&self, id: TaskId) -> Result<Task, TaskStoreError> {
            self.inner.get(id).await
        }

        async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Task>, TaskStoreError> {
            self.inner.list(limit, offset).await
        }

        async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task, TaskStoreError> {
            if (self.rejects)(&update) {
                return Err(anyhow::anyhow!("connection reset").into());
            }
            self.inner.update(id, update).await
        }
    }

    fn with_failing_updates(
        test_deps: &TestDependencies,
        rejects: fn(&TaskUpdate) -> bool,
    ) -> ServerDeps {
        let mut deps = (*test_deps.server_deps()).clone();
        deps.tasks = Arc::new(FailingUpdates {
            inner: test_deps.tasks.clone(),
            rejects,
        });
        deps
    }

    #[tokio::test]
    async fn test_success_completes_task() {
        let test_deps = TestDependencies::new()
            .mock_ai(MockAI::new().with_response("42"))
            .static_fetcher(ScriptedFetcher::new("static").then_html(RICH_HTML));
        let job = job_for(&test_deps).await;
        let deps = test_deps.server_deps();

        let outcome = process_task(&job, ctx(), &deps).await.unwrap();

        let TaskOutcome::Completed(task) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.answer.as_deref(), Some("42"));
        assert!(task.scraped_content.unwrap().contains("forty-two"));
        assert!(task.completed_at.is_some());
        assert!(task.error_message.is_none());
    }

    #[tokio::test]
    async fn test_blocked_fetch_fails_task_and_stays_retryable() {
        let test_deps = TestDependencies::new()
            .static_fetcher(ScriptedFetcher::new("static").then_fail(FetchError::blocked()));
        let job = job_for(&test_deps).await;
        let deps = test_deps.server_deps();

        let err = process_task(&job, ctx(), &deps).await.unwrap_err();

        assert!(matches!(&err, ProcessTaskError::Content(e) if e.kind() == Some(FetchErrorKind::Blocked)));
        assert!(err.is_retryable());

        let task = test_deps.tasks.get(job.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("403"));
        assert!(task.completed_at.is_some());
        assert!(task.answer.is_none());
        assert_eq!(test_deps.ai.call_count(), 0);
    }

    #[tokio::test]
    async fn test_answer_failure_keeps_scraped_content() {
        let test_deps = TestDependencies::new()
            .mock_ai(MockAI::new().with_response(""))
            .static_fetcher(ScriptedFetcher::new("static").then_html(RICH_HTML));
        let job = job_for(&test_deps).await;
        let deps = test_deps.server_deps();

        let err = process_task(&job, ctx(), &deps).await.unwrap_err();
        assert!(matches!(err, ProcessTaskError::Summarize(SummarizeError::EmptyResponse)));

        let task = test_deps.tasks.get(job.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.scraped_content.is_some());
        assert!(task.error_message.is_some());
    }

    #[tokio::test]
    async fn test_redelivery_after_failure_can_complete() {
        let test_deps = TestDependencies::new()
            .mock_ai(MockAI::new().with_error("overloaded").with_response("42"))
            .static_fetcher(ScriptedFetcher::new("static").always_html(RICH_HTML));
        let job = job_for(&test_deps).await;
        let deps = test_deps.server_deps();

        assert!(process_task(&job, ctx(), &deps).await.is_err());
        let retry_ctx = JobContext {
            attempt: 2,
            max_attempts: 3,
        };
        process_task(&job, retry_ctx, &deps).await.unwrap();

        let task = test_deps.tasks.get(job.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error_message.is_none());
        assert_eq!(
            test_deps.tasks.history(job.task_id),
            vec![
                TaskStatus::Pending,
                TaskStatus::Processing,
                TaskStatus::Failed,
                TaskStatus::Processing,
                TaskStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_completed_task_is_not_reprocessed() {
        let test_deps = TestDependencies::new()
            .mock_ai(MockAI::new().with_response("42"))
            .static_fetcher(ScriptedFetcher::new("static").always_html(RICH_HTML));
        let job = job_for(&test_deps).await;
        let deps = test_deps.server_deps();

        process_task(&job, ctx(), &deps).await.unwrap();
        let outcome = process_task(&job, ctx(), &deps).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::AlreadyCompleted));
        assert_eq!(test_deps.static_fetcher.call_count(), 1);
        assert_eq!(test_deps.ai.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_task_is_not_retryable() {
        let test_deps = TestDependencies::new();
        let deps = test_deps.server_deps();
        let job = ScrapeTaskJob {
            task_id: TaskId::new(404),
            url: "https://example.com".to_string(),
            question: "What?".to_string(),
        };

        let err = process_task(&job, ctx(), &deps).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_store_failure_after_scrape_is_recorded_on_task() {
        let test_deps = TestDependencies::new()
            .static_fetcher(ScriptedFetcher::new("static").then_html(RICH_HTML));
        let job = job_for(&test_deps).await;
        let deps = with_failing_updates(&test_deps, |update| {
            matches!(update, TaskUpdate::ContentScraped { .. })
        });
        let last_attempt = JobContext {
            attempt: 3,
            max_attempts: 3,
        };

        let err = process_task(&job, last_attempt, &deps).await.unwrap_err();
        assert!(matches!(err, ProcessTaskError::Store(TaskStoreError::Database(_))));
        assert!(err.is_retryable());

        let task = test_deps.tasks.get(job.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("connection reset"));
        assert_eq!(test_deps.ai.call_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_on_completion_is_recorded_on_task() {
        let test_deps = TestDependencies::new()
            .mock_ai(MockAI::new().with_response("42"))
            .static_fetcher(ScriptedFetcher::new("static").then_html(RICH_HTML));
        let job = job_for(&test_deps).await;
        let deps = with_failing_updates(&test_deps, |update| {
            matches!(update, TaskUpdate::Completed { .. })
        });

        let err = process_task(&job, ctx(), &deps).await.unwrap_err();
        assert!(matches!(err, ProcessTaskError::Store(TaskStoreError::Database(_))));

        let task = test_deps.tasks.get(job.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.answer.is_none());
        assert!(task.scraped_content.is_some());
    }

    #[tokio::test]
    async fn test_abandoned_task_is_marked_failed() {
        let test_deps = TestDependencies::new();
        let job = job_for(&test_deps).await;
        let deps = test_deps.server_deps();
        test_deps
            .tasks
            .update(job.task_id, TaskUpdate::Processing)
            .await
            .unwrap();

        let last_attempt = JobContext {
            attempt: 3,
            max_attempts: 3,
        };
        abandon_task(&job, last_attempt, &deps).await;

        let task = test_deps.tasks.get(job.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("attempt 3 of 3"));
        assert!(task.completed_at.is_some());
    }
}
