//! Static fetch strategy - a single HTTP GET with browser-like headers.
//!
//! No JavaScript rendering; pages that build their content client-side come
//! back thin and are rejected by the extractor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::debug;

use super::error::{classify_status, FetchError};
use super::{FetchedPage, PageFormat};
use crate::kernel::BasePageFetcher;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const STATIC_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_REDIRECTS: usize = 5;

/// Static fetcher using reqwest
pub struct StaticFetcher {
    client: reqwest::Client,
}

impl StaticFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(STATIC_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(default_headers())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers
}

fn map_transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(format!("{} ({})", url, e))
    } else {
        FetchError::network(e)
    }
}

#[async_trait]
impl BasePageFetcher for StaticFetcher {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        debug!(url = %url, "HTTP fetch starting");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        let status = response.status();
        classify_status(status.as_u16(), status.canonical_reason().unwrap_or("Unknown"))?;

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "HTTP fetch finished");

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            body,
            format: PageFormat::Html,
        })
    }
}
