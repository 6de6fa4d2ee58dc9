//! Server dependencies for job handlers and routes (using traits for testability)
//!
//! This module provides the central dependency container built once by the
//! process entry point and shared by the HTTP surface and the job worker.
//! All external services sit behind trait objects so tests can swap them.

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::domains::tasks::TaskStore;
use crate::kernel::jobs::JobQueue;
use crate::kernel::scraper::ContentService;
use crate::kernel::BaseAI;

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to handlers
#[derive(Clone)]
pub struct ServerDeps {
    /// Present in production; `None` when running on in-memory stores
    pub db_pool: Option<PgPool>,
    pub tasks: Arc<dyn TaskStore>,
    pub job_queue: Arc<dyn JobQueue>,
    pub content: Arc<ContentService>,
    /// Answering model
    pub ai: Arc<dyn BaseAI>,
    /// `None` disables the answering timeout
    pub summarize_timeout: Option<Duration>,
}

impl ServerDeps {
    pub fn new(
        db_pool: Option<PgPool>,
        tasks: Arc<dyn TaskStore>,
        job_queue: Arc<dyn JobQueue>,
        content: Arc<ContentService>,
        ai: Arc<dyn BaseAI>,
        summarize_timeout: Option<Duration>,
    ) -> Self {
        Self {
            db_pool,
            tasks,
            job_queue,
            content,
            ai,
            summarize_timeout,
        }
    }
}
