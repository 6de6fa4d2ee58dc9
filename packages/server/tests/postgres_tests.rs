//! SQL-backed task store and job queue against a real Postgres.
//!
//! Needs Docker (testcontainers). Run with: cargo test -- --ignored

mod common;

use std::time::Duration;

use crate::common::TestHarness;
use server_core::common::JobId;
use server_core::domains::tasks::{
    PostgresTaskStore, TaskStatus, TaskStore, TaskStoreError, TaskUpdate,
};
use server_core::kernel::jobs::{
    EnqueueResult, ErrorKind, FailureOutcome, JobQueue, JobSpec, JobStatus, PostgresJobQueue,
    QueueOptions, RetentionPolicy,
};
use server_core::kernel::retry::BackoffPolicy;
use test_context::test_context;

fn spec(key: &str) -> JobSpec {
    JobSpec {
        job_type: "scrape_task".to_string(),
        payload: serde_json::json!({ "key": key }),
        idempotency_key: Some(key.to_string()),
        max_attempts: None,
    }
}

async fn job_row(ctx: &TestHarness, id: JobId) -> (JobStatus, i32, Option<ErrorKind>) {
    sqlx::query_as("SELECT status, attempt, error_kind FROM jobs WHERE id = $1")
        .bind(id)
        .fetch_one(&ctx.db_pool)
        .await
        .expect("job row")
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn task_store_follows_state_machine(ctx: &TestHarness) {
    let store = PostgresTaskStore::new(ctx.db_pool.clone());

    let task = store.create("https://example.com", "What?").await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    let err = store
        .update(task.id, TaskUpdate::Completed { answer: "42".to_string() })
        .await
        .unwrap_err();
    assert!(matches!(err, TaskStoreError::IllegalTransition(_)));

    store.update(task.id, TaskUpdate::Processing).await.unwrap();
    store
        .update(
            task.id,
            TaskUpdate::ContentScraped {
                content: "page text".to_string(),
            },
        )
        .await
        .unwrap();
    let failed = store
        .update(task.id, TaskUpdate::Failed { error: "boom".to_string() })
        .await
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.completed_at.is_some());

    // Redelivery re-enters processing and clears the previous outcome
    let again = store.update(task.id, TaskUpdate::Processing).await.unwrap();
    assert!(again.error_message.is_none());
    assert!(again.completed_at.is_none());
    assert_eq!(again.scraped_content.as_deref(), Some("page text"));

    let done = store
        .update(task.id, TaskUpdate::Completed { answer: "42".to_string() })
        .await
        .unwrap();
    assert_eq!(done.answer.as_deref(), Some("42"));
    assert!(done.updated_at >= task.updated_at);

    let err = store.update(task.id, TaskUpdate::Processing).await.unwrap_err();
    assert!(matches!(err, TaskStoreError::IllegalTransition(_)));

    let missing = store.get(server_core::common::TaskId::new(i64::MAX)).await;
    assert!(matches!(missing, Err(TaskStoreError::NotFound(_))));
}

// The queue claims any due job, so its scenarios share one test.
#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn job_queue_delivery_lifecycle(ctx: &TestHarness) {
    sqlx::query("TRUNCATE jobs").execute(&ctx.db_pool).await.unwrap();
    let queue = PostgresJobQueue::new(
        ctx.db_pool.clone(),
        QueueOptions {
            retention: RetentionPolicy {
                succeeded_max_count: 0,
                ..RetentionPolicy::default()
            },
            // Long enough that a delayed job never becomes due mid-test
            backoff: BackoffPolicy::exponential(Duration::from_secs(60)),
            ..QueueOptions::default()
        },
    );

    // Idempotent enqueue
    let first = queue.enqueue(spec("scrape_task:1")).await.unwrap();
    let second = queue.enqueue(spec("scrape_task:1")).await.unwrap();
    assert!(first.is_created());
    assert_eq!(second, EnqueueResult::Duplicate(first.job_id()));

    // Claim holds a lease
    let claimed = queue.claim("worker-a", 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempt, 1);
    assert!(queue.claim("worker-b", 10).await.unwrap().is_empty());
    queue.heartbeat(first.job_id()).await.unwrap();

    // Retryable failure backs off
    let outcome = queue
        .mark_failed(first.job_id(), "rate limited", ErrorKind::Retryable)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        FailureOutcome::Retrying {
            attempt: 1,
            delay: Duration::from_secs(60)
        }
    );
    assert!(queue.claim("worker-a", 10).await.unwrap().is_empty());
    assert_eq!(
        job_row(ctx, first.job_id()).await,
        (JobStatus::Pending, 1, Some(ErrorKind::Retryable))
    );

    // Non-retryable failure dead-letters at once
    let poison = queue.enqueue(spec("scrape_task:2")).await.unwrap();
    let claimed = queue.claim("worker-a", 10).await.unwrap();
    assert_eq!(claimed[0].id, poison.job_id());
    let outcome = queue
        .mark_failed(poison.job_id(), "bad payload", ErrorKind::NonRetryable)
        .await
        .unwrap();
    assert_eq!(outcome, FailureOutcome::DeadLettered { attempt: 1 });

    // Shutdown hands the attempt back
    let interrupted = queue.enqueue(spec("scrape_task:3")).await.unwrap();
    queue.claim("worker-a", 10).await.unwrap();
    queue
        .mark_failed(interrupted.job_id(), "worker shutting down", ErrorKind::Shutdown)
        .await
        .unwrap();
    assert_eq!(job_row(ctx, interrupted.job_id()).await.1, 0);

    // Success, then retention removes it
    let claimed = queue.claim("worker-a", 10).await.unwrap();
    assert_eq!(claimed[0].id, interrupted.job_id());
    queue.mark_succeeded(interrupted.job_id()).await.unwrap();
    assert_eq!(job_row(ctx, interrupted.job_id()).await.0, JobStatus::Succeeded);

    let report = queue.prune().await.unwrap();
    assert_eq!(report.succeeded_removed, 1);
    assert_eq!(report.dead_letters_removed, 0);
    assert!(report.abandoned.is_empty());

    // Lease lost on the final attempt: prune dead-letters and reports it
    let lost = queue
        .enqueue(JobSpec {
            max_attempts: Some(1),
            ..spec("scrape_task:4")
        })
        .await
        .unwrap()
        .job_id();
    queue.claim("vanished-worker", 10).await.unwrap();
    sqlx::query("UPDATE jobs SET lease_expires_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
        .bind(lost)
        .execute(&ctx.db_pool)
        .await
        .unwrap();

    let report = queue.prune().await.unwrap();
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].id, lost);
    assert_eq!(report.abandoned[0].payload["key"], "scrape_task:4");
    assert_eq!(job_row(ctx, lost).await.0, JobStatus::DeadLetter);
}
