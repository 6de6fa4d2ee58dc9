// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (what to prompt for, when to retry) lives in the callers.
//
// Naming convention: Base* for trait names (e.g., BaseAI, BasePageFetcher)

use anyhow::Result;
use async_trait::async_trait;

use super::scraper::{FetchError, FetchedPage};

// =============================================================================
// AI Trait (Infrastructure - Generic LLM capabilities)
// =============================================================================

#[async_trait]
pub trait BaseAI: Send + Sync {
    /// Complete a prompt with an LLM (returns raw text response, possibly empty)
    async fn complete(&self, prompt: &str) -> Result<String>;
}

// =============================================================================
// Page Fetcher Trait (Infrastructure - one retrieval strategy)
// =============================================================================

#[async_trait]
pub trait BasePageFetcher: Send + Sync {
    /// Strategy name for logs ("static", "dynamic")
    fn name(&self) -> &'static str;

    /// Perform exactly one attempt to retrieve the page.
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchError>;
}
