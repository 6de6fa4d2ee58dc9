//! Tasks domain activities - intake and the worker pipeline

pub mod answer;
pub mod create_task;
pub mod process_task;

pub use answer::{SummarizeError, Summarizer};
pub use create_task::{create_task, CreateTaskError, NewTask, ValidationError};
pub use process_task::{abandon_task, process_task, ProcessTaskError, TaskOutcome};
