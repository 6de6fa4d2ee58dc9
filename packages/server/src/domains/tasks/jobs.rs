//! Background jobs owned by the tasks domain.

use serde::{Deserialize, Serialize};

use super::activities::{abandon_task, process_task};
use crate::common::TaskId;
use crate::kernel::jobs::{CommandMeta, JobFailure, JobRegistry};

/// Scrape a task's URL and answer its question.
///
/// Enqueued once per task, after the task row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeTaskJob {
    pub task_id: TaskId,
    pub url: String,
    pub question: String,
}

impl ScrapeTaskJob {
    pub const JOB_TYPE: &'static str = "scrape_task";
}

impl CommandMeta for ScrapeTaskJob {
    fn command_type(&self) -> &'static str {
        Self::JOB_TYPE
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("{}:{}", Self::JOB_TYPE, self.task_id))
    }
}

/// Register every tasks-domain job handler.
pub fn register_task_jobs(registry: &mut JobRegistry) {
    registry.register::<ScrapeTaskJob, _, _>(ScrapeTaskJob::JOB_TYPE, |job, ctx, deps| async move {
        process_task(&job, ctx, &deps)
            .await
            .map(|_| ())
            .map_err(|e| {
                if e.is_retryable() {
                    JobFailure::retryable(e)
                } else {
                    JobFailure::non_retryable(e)
                }
            })
    });
    registry.on_abandoned::<ScrapeTaskJob, _, _>(ScrapeTaskJob::JOB_TYPE, |job, ctx, deps| async move {
        abandon_task(&job, ctx, &deps).await
    });
}
