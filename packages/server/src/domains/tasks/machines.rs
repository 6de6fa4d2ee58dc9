//! Task state machine
//!
//! Pure decision logic - NO IO, only state transitions.
//! Both task stores consult this machine so the in-memory and Postgres
//! implementations accept exactly the same transitions.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{Task, TaskChanges, TaskStatus};

/// A requested change to a task, named by what the worker observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskUpdate {
    /// A job lease was accepted for this task (first delivery or redelivery)
    Processing,
    /// Extraction succeeded; the task stays `processing`
    ContentScraped { content: String },
    Completed { answer: String },
    Failed { error: String },
}

impl TaskUpdate {
    pub fn target(&self) -> TaskStatus {
        match self {
            TaskUpdate::Processing | TaskUpdate::ContentScraped { .. } => TaskStatus::Processing,
            TaskUpdate::Completed { .. } => TaskStatus::Completed,
            TaskUpdate::Failed { .. } => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal task transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Task domain state machine
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Statuses from which `update` may be applied.
    ///
    /// `processing` and `failed` re-enter `processing` only through job
    /// redelivery. Nothing leaves `completed`.
    pub fn allowed_from(update: &TaskUpdate) -> &'static [TaskStatus] {
        match update {
            TaskUpdate::Processing => &[
                TaskStatus::Pending,
                TaskStatus::Processing,
                TaskStatus::Failed,
            ],
            TaskUpdate::ContentScraped { .. }
            | TaskUpdate::Completed { .. }
            | TaskUpdate::Failed { .. } => &[TaskStatus::Processing],
        }
    }

    pub fn check(from: TaskStatus, update: &TaskUpdate) -> Result<TaskStatus, IllegalTransition> {
        let to = update.target();
        if Self::allowed_from(update).contains(&from) {
            Ok(to)
        } else {
            Err(IllegalTransition { from, to })
        }
    }

    /// Column effects of `update`, independent of the current row.
    ///
    /// Entering a terminal status stamps `completed_at`; anything else clears it.
    pub fn changes(update: &TaskUpdate) -> TaskChanges {
        let mut changes = TaskChanges {
            set_completed_at: update.target().is_terminal(),
            ..TaskChanges::default()
        };
        match update {
            TaskUpdate::Processing => {}
            TaskUpdate::ContentScraped { content } => {
                changes.scraped_content = Some(content.clone());
            }
            TaskUpdate::Completed { answer } => changes.answer = Some(answer.clone()),
            TaskUpdate::Failed { error } => changes.error_message = Some(error.clone()),
        }
        changes
    }

    /// Apply `update` to an in-memory task, refreshing `updated_at`.
    pub fn apply(
        task: &Task,
        update: &TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<Task, IllegalTransition> {
        let status = Self::check(task.status, update)?;
        let changes = Self::changes(update);

        Ok(Task {
            status,
            scraped_content: changes.scraped_content.or_else(|| task.scraped_content.clone()),
            answer: changes.answer,
            error_message: changes.error_message,
            completed_at: changes.set_completed_at.then_some(now),
            updated_at: now,
            ..task.clone()
        })
    }
}
