//! Job infrastructure for background task execution.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`JobQueue`] - at-least-once delivery with backoff, leases and retention
//! - [`PostgresJobQueue`] / [`InMemoryJobQueue`] - its two implementations
//! - [`JobRegistry`] - maps job types to domain handlers
//! - [`JobWorker`] - long-running service that claims and executes jobs
//!
//! # Architecture
//!
//! ```text
//! Intake calls queue.enqueue_command(&job)
//!     │
//!     └─► Insert job row (idempotency key dedupes)
//!
//! JobWorker
//!     │
//!     ├─► Claim jobs (FOR UPDATE SKIP LOCKED, lease)
//!     ├─► JobRegistry.execute (deserialize + call handler)
//!     └─► Mark succeeded/failed (queue schedules retry or dead-letters)
//! ```
//!
//! Background jobs and their handlers live in their respective domains.
//! This module only provides the infrastructure.

mod job;
mod memory;
mod queue;
mod registry;
mod worker;

pub use job::{
    ClaimedJob, CommandMeta, EnqueueResult, ErrorKind, FailureOutcome, JobSpec, JobStatus,
    PruneReport, RetentionPolicy,
};
pub use memory::{InMemoryJobQueue, JobSnapshot};
pub use queue::{JobQueue, JobQueueExt, PostgresJobQueue, QueueOptions};
pub use registry::{JobContext, JobFailure, JobRegistry, JobResult, SharedJobRegistry};
pub use worker::{JobWorker, JobWorkerConfig};
