//! Typed errors for fetching and extracting page content.
//!
//! Every failure carries a classified kind so retry policy can branch on it
//! without inspecting message strings.

use std::fmt;
use thiserror::Error;

/// Classification of a single fetch attempt's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// 403 - the site refused us; permanent for the fetch retry loop
    Blocked,
    /// 429
    RateLimited,
    /// Any other 4xx/5xx
    HttpError,
    /// Request or navigation exceeded its deadline
    Timeout,
    /// Connection, DNS, TLS, or body read failure
    Network,
    /// The headless browser could not be started
    BrowserLaunchFailure,
}

impl FetchErrorKind {
    /// Whether the static strategy's own loop may try again.
    pub fn is_retryable(self) -> bool {
        !matches!(self, FetchErrorKind::Blocked)
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchErrorKind::Blocked => "blocked",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::HttpError => "http_error",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Network => "network",
            FetchErrorKind::BrowserLaunchFailure => "browser_launch_failure",
        };
        f.write_str(s)
    }
}

/// A failed fetch attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn blocked() -> Self {
        Self::new(
            FetchErrorKind::Blocked,
            "Website blocked the request (403 Forbidden). The site may have anti-scraping protection.",
        )
    }

    pub fn rate_limited() -> Self {
        Self::new(
            FetchErrorKind::RateLimited,
            "Rate limited (429). Please try again later.",
        )
    }

    pub fn http(status: u16, reason: &str) -> Self {
        Self::new(FetchErrorKind::HttpError, format!("HTTP {}: {}", status, reason))
    }

    pub fn timeout(what: impl fmt::Display) -> Self {
        Self::new(FetchErrorKind::Timeout, format!("Timed out: {}", what))
    }

    pub fn network(what: impl fmt::Display) -> Self {
        Self::new(FetchErrorKind::Network, format!("Network error: {}", what))
    }

    pub fn browser_launch(what: impl fmt::Display) -> Self {
        Self::new(
            FetchErrorKind::BrowserLaunchFailure,
            format!("Failed to launch headless browser: {}", what),
        )
    }
}

/// Classify a response status. Anything below 400 is accepted for extraction.
pub fn classify_status(status: u16, reason: &str) -> Result<(), FetchError> {
    match status {
        403 => Err(FetchError::blocked()),
        429 => Err(FetchError::rate_limited()),
        s if s >= 400 => Err(FetchError::http(s, reason)),
        _ => Ok(()),
    }
}

/// Extraction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The cleaned text is too short to be the real page; it likely needs
    /// client-side rendering.
    #[error(
        "Website returned insufficient content ({length} characters, need {minimum}). \
         The site may load content dynamically with JavaScript; enable USE_DYNAMIC_FETCH for such sites."
    )]
    InsufficientContent { length: usize, minimum: usize },
}

/// Outcome of `ContentService::fetch`.
#[derive(Debug, Clone, Error)]
pub enum ContentError {
    /// Surfaced without retry (403 on the static strategy).
    #[error("Failed to scrape website: {0}")]
    Fetch(FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Every static attempt failed.
    #[error("Failed to scrape website after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FetchError },
}

impl ContentError {
    /// Underlying fetch classification, when the failure came from a fetch.
    pub fn kind(&self) -> Option<FetchErrorKind> {
        match self {
            ContentError::Fetch(e) | ContentError::Exhausted { last: e, .. } => Some(e.kind),
            ContentError::Extract(_) => None,
        }
    }

    pub fn is_insufficient_content(&self) -> bool {
        matches!(self, ContentError::Extract(ExtractError::InsufficientContent { .. }))
    }
}
