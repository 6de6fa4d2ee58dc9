//! Task intake: validate, persist, then enqueue.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use tracing::info;
use url::{Host, Url};

use crate::domains::tasks::jobs::ScrapeTaskJob;
use crate::domains::tasks::models::Task;
use crate::domains::tasks::store::TaskStoreError;
use crate::kernel::jobs::JobQueueExt;
use crate::kernel::ServerDeps;

pub const MAX_QUESTION_LENGTH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL and question cannot be empty")]
    Empty,
    #[error("Question is too long (max {MAX_QUESTION_LENGTH} characters)")]
    QuestionTooLong,
    #[error("Invalid URL format")]
    InvalidUrl,
    #[error("Only HTTP and HTTPS protocols are allowed")]
    UnsupportedScheme,
    #[error("Local and private network URLs are not allowed")]
    PrivateHost,
}

#[derive(Debug, Error)]
pub enum CreateTaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] TaskStoreError),
    #[error("failed to enqueue task: {0}")]
    Enqueue(#[source] anyhow::Error),
}

/// A trimmed, checked intake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub url: String,
    pub question: String,
}

impl NewTask {
    pub fn validate(url: &str, question: &str) -> Result<Self, ValidationError> {
        let url = url.trim();
        let question = question.trim();

        if url.is_empty() || question.is_empty() {
            return Err(ValidationError::Empty);
        }
        if question.chars().count() > MAX_QUESTION_LENGTH {
            return Err(ValidationError::QuestionTooLong);
        }

        let parsed = Url::parse(url).map_err(|_| ValidationError::InvalidUrl)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme);
        }
        match parsed.host() {
            None => return Err(ValidationError::InvalidUrl),
            Some(host) if is_private_host(&host) => return Err(ValidationError::PrivateHost),
            Some(_) => {}
        }

        Ok(Self {
            url: url.to_string(),
            question: question.to_string(),
        })
    }
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_private_v4(ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    // fc00::/7 unique local, fe80::/10 link local
    let first = ip.segments()[0];
    ip.is_loopback() || ip.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// Create the task record, then enqueue its job.
///
/// The job is enqueued only once the row is readable, so the worker never
/// races ahead of the record it has to update.
pub async fn create_task(new_task: NewTask, deps: &ServerDeps) -> Result<Task, CreateTaskError> {
    let task = deps.tasks.create(&new_task.url, &new_task.question).await?;

    let job = ScrapeTaskJob {
        task_id: task.id,
        url: task.url.clone(),
        question: task.question.clone(),
    };
    let enqueued = deps
        .job_queue
        .enqueue_command(&job)
        .await
        .map_err(CreateTaskError::Enqueue)?;

    info!(task_id = %task.id, job_id = %enqueued.job_id(), url = %task.url, "task created");
    Ok(task)
}
