//! Page retrieval and text extraction.
//!
//! - [`StaticFetcher`] - one HTTP GET per attempt
//! - [`BrowserFetcher`] - one headless-browser render per attempt
//! - [`extract_text`] - raw page to cleaned, bounded text
//! - [`ContentService`] - strategy selection, fallback, and the retry loop

mod browser_fetcher;
mod content_service;
mod error;
mod extractor;
mod static_fetcher;

pub use browser_fetcher::{BrowserFetcher, BrowserFetcherConfig};
pub use content_service::{ContentConfig, ContentService};
pub use error::{classify_status, ContentError, ExtractError, FetchError, FetchErrorKind};
pub use extractor::{extract_text, ExtractOptions};
pub use static_fetcher::StaticFetcher;

/// What a fetcher hands to the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    /// Raw markup; region selection and tag stripping apply.
    Html,
    /// Already-rendered visible text (dynamic strategy).
    Text,
}

/// Raw result of one successful fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
    pub format: PageFormat,
}

impl FetchedPage {
    pub fn html(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            body: body.into(),
            format: PageFormat::Html,
        }
    }
}
