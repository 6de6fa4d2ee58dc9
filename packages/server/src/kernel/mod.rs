//! Kernel module - server infrastructure and dependencies.

pub mod ai;
pub mod deps;
pub mod jobs;
pub mod retry;
pub mod scraper;
pub mod test_dependencies;
pub mod traits;

pub use ai::OpenAIAnswerModel;
pub use deps::ServerDeps;
pub use test_dependencies::TestDependencies;
pub use traits::*;
