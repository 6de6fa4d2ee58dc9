//! Job types shared by every queue implementation.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::common::JobId;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "error_kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Job was interrupted by graceful shutdown - will retry without
    /// consuming an attempt
    Shutdown,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::NonRetryable => write!(f, "non_retryable"),
            ErrorKind::Shutdown => write!(f, "shutdown"),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Metadata for command serialization.
///
/// Commands implement this to provide their job type and an optional
/// idempotency key.
pub trait CommandMeta {
    /// The command type name (used as job_type).
    fn command_type(&self) -> &'static str;

    /// Optional idempotency key.
    ///
    /// If provided, enqueueing the same key twice yields the existing job.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    /// Override the queue's default attempt cap.
    fn max_attempts(&self) -> Option<u32> {
        None
    }
}

/// A serialized command ready to be enqueued.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub max_attempts: Option<u32>,
}

impl JobSpec {
    pub fn from_command<C>(command: &C) -> Result<Self>
    where
        C: Serialize + CommandMeta,
    {
        Ok(Self {
            job_type: command.command_type().to_string(),
            payload: serde_json::to_value(command)?,
            idempotency_key: command.idempotency_key(),
            max_attempts: command.max_attempts(),
        })
    }
}

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Command was enqueued, returns new job ID
    Created(JobId),
    /// Command already exists (idempotency hit), returns existing job ID
    Duplicate(JobId),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or duplicate
    pub fn job_id(&self) -> JobId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// A claimed job ready for execution.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// 1-based attempt number of this execution
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ClaimedJob {
    /// Deserialize the command payload.
    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| anyhow!("failed to deserialize {}: {}", self.job_type, e))
    }
}

/// What `mark_failed` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Rescheduled; `attempt` is the attempt that just failed
    Retrying { attempt: u32, delay: Duration },
    DeadLettered { attempt: u32 },
}

// ============================================================================
// Retention
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub succeeded_max_count: usize,
    pub succeeded_max_age: Duration,
    pub dead_letter_max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            succeeded_max_count: 100,
            succeeded_max_age: Duration::from_secs(24 * 60 * 60),
            dead_letter_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// What one `prune` pass did.
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub succeeded_removed: u64,
    pub dead_letters_removed: u64,
    /// Dead-lettered because their lease expired on the final attempt
    pub abandoned: Vec<ClaimedJob>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.succeeded_removed == 0 && self.dead_letters_removed == 0 && self.abandoned.is_empty()
    }
}
