//! Task record store
//!
//! The worker and the intake surface only see [`TaskStore`]. Every update is
//! checked against [`TaskStateMachine`] atomically with the write.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;

use super::machines::{IllegalTransition, TaskStateMachine, TaskUpdate};
use super::models::{Task, TaskStatus};
use crate::common::TaskId;

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("task store error: {0}")]
    Database(#[from] anyhow::Error),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task at `pending`.
    async fn create(&self, url: &str, question: &str) -> Result<Task, TaskStoreError>;

    async fn get(&self, id: TaskId) -> Result<Task, TaskStoreError>;

    /// Newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Task>, TaskStoreError>;

    /// Apply a state-machine-checked update and return the new record.
    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task, TaskStoreError>;
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create(&self, url: &str, question: &str) -> Result<Task, TaskStoreError> {
        let task = Task::create(url, question, &self.pool).await?;
        debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, TaskStoreError> {
        Task::find_by_id(id, &self.pool)
            .await?
            .ok_or(TaskStoreError::NotFound(id))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Task>, TaskStoreError> {
        Ok(Task::find_recent(limit, offset, &self.pool).await?)
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task, TaskStoreError> {
        let to = update.target();
        let updated = Task::transition(
            id,
            TaskStateMachine::allowed_from(&update),
            to,
            TaskStateMachine::changes(&update),
            &self.pool,
        )
        .await?;

        match updated {
            Some(task) => {
                debug!(task_id = %id, status = %task.status, "task updated");
                Ok(task)
            }
            // Guard rejected the row; report why
            None => {
                let current = self.get(id).await?;
                Err(IllegalTransition {
                    from: current.status,
                    to,
                }
                .into())
            }
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryState {
    last_id: i64,
    tasks: BTreeMap<TaskId, Task>,
    history: BTreeMap<TaskId, Vec<TaskStatus>>,
}

/// Store used by tests and local runs without a database.
#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status the task has held, in order, starting with `pending`.
    pub fn history(&self, id: TaskId) -> Vec<TaskStatus> {
        self.lock()
            .map(|state| state.history.get(&id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("task store lock poisoned"))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, url: &str, question: &str) -> Result<Task, TaskStoreError> {
        let mut state = self.lock()?;
        state.last_id += 1;
        let id = TaskId::new(state.last_id);
        let now = Utc::now();

        let task = Task {
            id,
            url: url.to_string(),
            question: question.to_string(),
            status: TaskStatus::Pending,
            scraped_content: None,
            answer: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        state.tasks.insert(id, task.clone());
        state.history.insert(id, vec![TaskStatus::Pending]);
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, TaskStoreError> {
        self.lock()?
            .tasks
            .get(&id)
            .cloned()
            .ok_or(TaskStoreError::NotFound(id))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Task>, TaskStoreError> {
        let state = self.lock()?;
        // Ids are assigned in creation order
        Ok(state
            .tasks
            .values()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task, TaskStoreError> {
        let mut state = self.lock()?;
        let current = state.tasks.get(&id).ok_or(TaskStoreError::NotFound(id))?;
        let next = TaskStateMachine::apply(current, &update, Utc::now())?;

        state.tasks.insert(id, next.clone());
        let history = state.history.entry(id).or_default();
        if history.last() != Some(&next.status) {
            history.push(next.status);
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraped(content: &str) -> TaskUpdate {
        TaskUpdate::ContentScraped {
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let store = InMemoryTaskStore::new();
        let task = store.create("https://example.com", "What?").await.unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.completed_at.is_none());
        assert_eq!(store.get(task.id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_get_missing_task() {
        let store = InMemoryTaskStore::new();
        let err = store.get(TaskId::new(99)).await.unwrap_err();
        assert!(matches!(err, TaskStoreError::NotFound(id) if id == TaskId::new(99)));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = InMemoryTaskStore::new();
        let task = store.create("https://example.com", "What?").await.unwrap();

        store.update(task.id, TaskUpdate::Processing).await.unwrap();
        store.update(task.id, scraped("page text")).await.unwrap();
        let done = store
            .update(
                task.id,
                TaskUpdate::Completed {
                    answer: "42".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.scraped_content.as_deref(), Some("page text"));
        assert_eq!(done.answer.as_deref(), Some("42"));
        assert!(done.completed_at.is_some());
        assert!(done.updated_at >= task.updated_at);
        assert_eq!(
            store.history(task.id),
            vec![TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_record_untouched() {
        let store = InMemoryTaskStore::new();
        let task = store.create("https://example.com", "What?").await.unwrap();

        let err = store
            .update(
                task.id,
                TaskUpdate::Completed {
                    answer: "42".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskStoreError::IllegalTransition(IllegalTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
            })
        ));
        assert_eq!(store.get(task.id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_with_paging() {
        let store = InMemoryTaskStore::new();
        for i in 0..5 {
            store
                .create(&format!("https://example.com/{i}"), "What?")
                .await
                .unwrap();
        }

        let page = store.list(2, 1).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|task| task.id.as_i64()).collect();
        assert_eq!(ids, vec![4, 3]);
    }
}
