//! Content service - picks a fetch strategy, retries, and extracts.
//!
//! ```text
//! fetch(url)
//!     │
//!     ├─► dynamic (only when enabled) ── any failure ──┐
//!     │                                                 ▼
//!     └─► static, up to N attempts ◄────────────────────┘
//!             ├─ 403             → surface immediately
//!             ├─ other failure   → back off, try again
//!             └─ thin content    → stop (optionally escalate to dynamic)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::{ContentError, ExtractError, FetchError, FetchErrorKind};
use super::extractor::{extract_text, ExtractOptions};
use crate::kernel::retry::BackoffPolicy;
use crate::kernel::BasePageFetcher;

#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Try the dynamic strategy first, falling back to static
    pub use_dynamic_fetch: bool,
    /// Escalate a static `InsufficientContent` to the dynamic strategy
    pub dynamic_fallback_on_insufficient: bool,
    pub max_content_length: usize,
    pub fetch_max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub min_region_length: usize,
    pub min_content_length: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            use_dynamic_fetch: false,
            dynamic_fallback_on_insufficient: false,
            max_content_length: 50_000,
            fetch_max_attempts: 3,
            backoff: BackoffPolicy::exponential(Duration::from_millis(1000))
                .capped(Duration::from_millis(5000)),
            min_region_length: 100,
            min_content_length: 50,
        }
    }
}

impl ContentConfig {
    fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            max_length: self.max_content_length,
            min_region_length: self.min_region_length,
            min_content_length: self.min_content_length,
        }
    }
}

pub struct ContentService {
    static_fetcher: Arc<dyn BasePageFetcher>,
    dynamic_fetcher: Option<Arc<dyn BasePageFetcher>>,
    config: ContentConfig,
}

impl ContentService {
    pub fn new(
        static_fetcher: Arc<dyn BasePageFetcher>,
        dynamic_fetcher: Option<Arc<dyn BasePageFetcher>>,
        config: ContentConfig,
    ) -> Self {
        Self {
            static_fetcher,
            dynamic_fetcher,
            config,
        }
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    /// Fetch and extract the page's text.
    pub async fn fetch(&self, url: &str) -> Result<String, ContentError> {
        let mut dynamic_tried = false;

        if self.config.use_dynamic_fetch {
            if let Some(dynamic) = &self.dynamic_fetcher {
                dynamic_tried = true;
                match self.fetch_dynamic(dynamic.as_ref(), url).await {
                    Ok(content) => return Ok(content),
                    Err(e) => {
                        warn!(url = %url, error = %e, "dynamic fetch failed, falling back to static");
                    }
                }
            } else {
                warn!(url = %url, "dynamic fetch enabled but no browser fetcher configured");
            }
        }

        match self.fetch_static(url).await {
            Err(e) if e.is_insufficient_content() && self.should_escalate(dynamic_tried) => {
                let Some(dynamic) = &self.dynamic_fetcher else {
                    return Err(e);
                };
                info!(url = %url, "static content insufficient, escalating to dynamic fetch");
                self.fetch_dynamic(dynamic.as_ref(), url).await.map_err(|dynamic_err| {
                    warn!(url = %url, error = %dynamic_err, "dynamic escalation failed");
                    e
                })
            }
            other => other,
        }
    }

    fn should_escalate(&self, dynamic_tried: bool) -> bool {
        self.config.dynamic_fallback_on_insufficient
            && !dynamic_tried
            && self.dynamic_fetcher.is_some()
    }

    /// One dynamic attempt, no retry.
    async fn fetch_dynamic(
        &self,
        fetcher: &dyn BasePageFetcher,
        url: &str,
    ) -> Result<String, ContentError> {
        debug!(url = %url, strategy = fetcher.name(), "fetch attempt");
        let page = fetcher.fetch(url).await.map_err(ContentError::Fetch)?;
        Ok(extract_text(&page, &self.config.extract_options())?)
    }

    async fn fetch_static(&self, url: &str) -> Result<String, ContentError> {
        let max_attempts = self.config.fetch_max_attempts.max(1);
        let mut last_error: Option<FetchError> = None;

        for attempt in 1..=max_attempts {
            debug!(
                url = %url,
                strategy = self.static_fetcher.name(),
                attempt,
                max_attempts,
                "fetch attempt"
            );

            match self.static_fetcher.fetch(url).await {
                Ok(page) => {
                    return match extract_text(&page, &self.config.extract_options()) {
                        Ok(content) => {
                            info!(url = %url, attempt, chars = content.chars().count(), "content extracted");
                            Ok(content)
                        }
                        Err(e @ ExtractError::InsufficientContent { .. }) => {
                            warn!(url = %url, attempt, error = %e, "insufficient content");
                            Err(e.into())
                        }
                    };
                }
                Err(e) if e.kind == FetchErrorKind::Blocked => {
                    warn!(url = %url, attempt, "fetch blocked, not retrying");
                    return Err(ContentError::Fetch(e));
                }
                Err(e) => {
                    warn!(url = %url, attempt, kind = %e.kind, error = %e, "fetch attempt failed");
                    if attempt < max_attempts {
                        let delay = self.config.backoff.delay_for(attempt);
                        debug!(url = %url, delay_ms = delay.as_millis() as u64, "waiting before retry");
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(ContentError::Exhausted {
            attempts: max_attempts,
            last: last_error
                .unwrap_or_else(|| FetchError::network("no fetch attempt was made")),
        })
    }
}
