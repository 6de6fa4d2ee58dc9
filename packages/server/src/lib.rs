// Scrape-and-answer server core
//
// Accepts (URL, question) tasks over HTTP, queues them, and runs a worker
// that fetches the page, extracts its text, asks a language model, and
// records the outcome on the task.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
