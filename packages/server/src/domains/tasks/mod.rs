//! Tasks domain - scrape-and-answer requests and their processing pipeline

pub mod activities;
pub mod jobs;
pub mod machines;
pub mod models;
pub mod store;

pub use jobs::{register_task_jobs, ScrapeTaskJob};
pub use machines::{IllegalTransition, TaskStateMachine, TaskUpdate};
pub use models::{Task, TaskStatus};
pub use store::{InMemoryTaskStore, PostgresTaskStore, TaskStore, TaskStoreError};
