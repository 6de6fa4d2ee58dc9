use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::TaskId;

/// Task - one scrape-and-answer request and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub question: String,
    pub status: TaskStatus,
    pub scraped_content: Option<String>,
    pub answer: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Task status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// Raw `tasks` row; `status` is stored as text
#[derive(Debug, Clone, FromRow)]
struct TaskRow {
    id: TaskId,
    url: String,
    question: String,
    status: String,
    scraped_content: Option<String>,
    answer: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            url: row.url,
            question: row.question,
            status: row.status.parse()?,
            scraped_content: row.scraped_content,
            answer: row.answer,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

/// Column assignments applied by a guarded status update
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub scraped_content: Option<String>,
    pub answer: Option<String>,
    pub error_message: Option<String>,
    pub set_completed_at: bool,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Task {
    /// Insert a new pending task
    pub async fn create(url: &str, question: &str, pool: &PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (url, question, status)
            VALUES ($1, $2, 'pending')
            RETURNING *
            "#,
        )
        .bind(url)
        .bind(question)
        .fetch_one(pool)
        .await?;

        row.try_into()
    }

    pub async fn find_by_id(id: TaskId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    /// Newest first
    pub async fn find_recent(limit: i64, offset: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(Task::try_from)
        .collect()
    }

    /// Move the task to `to` only if its current status is one of `from`.
    ///
    /// `scraped_content` keeps its stored value when `changes` leaves it unset;
    /// `answer`, `error_message` and `completed_at` are always overwritten.
    /// Returns `None` when the row is missing or not in an allowed status.
    pub async fn transition(
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        changes: TaskChanges,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let from: Vec<String> = from.iter().map(|status| status.to_string()).collect();

        sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET status = $3,
                scraped_content = COALESCE($4, scraped_content),
                answer = $5,
                error_message = $6,
                completed_at = CASE WHEN $7 THEN NOW() ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&from)
        .bind(to.to_string())
        .bind(changes.scraped_content)
        .bind(changes.answer)
        .bind(changes.error_message)
        .bind(changes.set_completed_at)
        .fetch_optional(pool)
        .await?
        .map(Task::try_from)
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_task_serializes_camel_case() {
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(1),
            url: "https://example.com".to_string(),
            question: "What?".to_string(),
            status: TaskStatus::Completed,
            scraped_content: Some("content".to_string()),
            answer: Some("42".to_string()),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["scrapedContent"], "content");
        assert!(json["errorMessage"].is_null());
        assert!(json.get("completedAt").is_some());
    }
}
