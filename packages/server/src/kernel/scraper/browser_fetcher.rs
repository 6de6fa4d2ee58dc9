//! Dynamic fetch strategy - render the page in a headless Chromium.
//!
//! Each fetch launches its own browser process, so no cookies, cache, or
//! storage leak between tasks. The process is torn down on every exit path:
//! explicitly after a normal attempt (success, error, or timeout), and by the
//! session guard's `Drop` if the attempt future itself is dropped.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{classify_status, FetchError};
use super::{FetchedPage, PageFormat};
use crate::kernel::BasePageFetcher;

pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Strips non-content elements in the live DOM, then reads the rendered text.
const VISIBLE_TEXT_SCRIPT: &str = r#"(() => {
    document.querySelectorAll('script, style, noscript, iframe').forEach((el) => el.remove());
    const body = document.body;
    if (!body) { return ''; }
    return body.innerText || body.textContent || '';
})()"#;

#[derive(Debug, Clone)]
pub struct BrowserFetcherConfig {
    pub chrome_executable: Option<String>,
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for BrowserFetcherConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            navigation_timeout: NAVIGATION_TIMEOUT,
            settle_delay: SETTLE_DELAY,
        }
    }
}

/// Headless-browser fetcher using chromiumoxide
pub struct BrowserFetcher {
    config: BrowserFetcherConfig,
}

impl BrowserFetcher {
    pub fn new(config: BrowserFetcherConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self) -> Result<BrowserConfig, FetchError> {
        let mut builder = BrowserConfig::builder()
            .arg("--incognito")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", USER_AGENT))
            .request_timeout(self.config.navigation_timeout);

        if let Some(path) = &self.config.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(FetchError::browser_launch)
    }

    async fn launch(&self) -> Result<BrowserSession, FetchError> {
        let (browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(FetchError::browser_launch)?;

        // The CDP handler must be polled for the browser to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(BrowserSession {
            browser: Some(browser),
            handler_task,
        })
    }

    async fn render(&self, browser: &Browser, url: &str) -> Result<FetchedPage, FetchError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::network(format!("failed to open page: {}", e)))?;

        let navigation = tokio::time::timeout(self.config.navigation_timeout, navigate(&page, url))
            .await
            .map_err(|_| {
                FetchError::timeout(format!(
                    "navigation to {} exceeded {}s",
                    url,
                    self.config.navigation_timeout.as_secs()
                ))
            })?;
        let status = navigation?;

        if let Some((code, reason)) = &status {
            classify_status(*code, reason)?;
        }

        // Let client-side rendering settle.
        tokio::time::sleep(self.config.settle_delay).await;

        let text: String = page
            .evaluate(VISIBLE_TEXT_SCRIPT)
            .await
            .map_err(|e| FetchError::network(format!("failed to read rendered text: {}", e)))?
            .into_value()
            .map_err(|e| FetchError::network(format!("unexpected rendered text value: {}", e)))?;

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(FetchedPage {
            url: final_url,
            status: status.map(|(code, _)| code).unwrap_or(200),
            body: text,
            format: PageFormat::Text,
        })
    }
}

/// Navigate and report the main document's status, when the browser saw one.
async fn navigate(page: &Page, url: &str) -> Result<Option<(u16, String)>, FetchError> {
    page.goto(url)
        .await
        .map_err(|e| FetchError::network(format!("navigation to {} failed: {}", url, e)))?;

    let response = page
        .wait_for_navigation_response()
        .await
        .map_err(|e| FetchError::network(format!("navigation to {} failed: {}", url, e)))?;

    Ok(response.and_then(|request| {
        request
            .response
            .as_ref()
            .map(|r| (r.status as u16, r.status_text.clone()))
    }))
}

/// Owns one browser process for the duration of a fetch.
struct BrowserSession {
    browser: Option<Browser>,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    fn browser(&self) -> Option<&Browser> {
        self.browser.as_ref()
    }

    /// Close the browser and wait for the process to exit.
    async fn shutdown(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "failed to close headless browser cleanly");
            }
            if let Err(e) = browser.wait().await {
                warn!(error = %e, "failed to reap headless browser process");
            }
        }
        self.handler_task.abort();
        debug!("headless browser shut down");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Dropping `Browser` kills the child process; the handler loop would
        // otherwise spin until the websocket closes.
        self.handler_task.abort();
    }
}

#[async_trait]
impl BasePageFetcher for BrowserFetcher {
    fn name(&self) -> &'static str {
        "dynamic"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        debug!(url = %url, "launching headless browser");
        let session = self.launch().await?;

        let result = match session.browser() {
            Some(browser) => self.render(browser, url).await,
            None => Err(FetchError::browser_launch("browser session already closed")),
        };

        session.shutdown().await;
        result
    }
}
