use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::jobs::{JobWorkerConfig, QueueOptions};
use crate::kernel::scraper::ContentConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub use_dynamic_fetch: bool,
    pub dynamic_fallback_on_insufficient: bool,
    pub chrome_executable: Option<String>,
    pub max_content_length: usize,
    pub worker_concurrency: usize,
    pub job_max_attempts: u32,
    pub fetch_max_attempts: u32,
    /// `None` when `SUMMARIZE_TIMEOUT_SECS=0`
    pub summarize_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let summarize_timeout_secs: u64 = parse_var("SUMMARIZE_TIMEOUT_SECS", 120)?;

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_var("PORT", 3001)?,
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| openai_client::DEFAULT_BASE_URL.to_string()),
            use_dynamic_fetch: parse_flag("USE_DYNAMIC_FETCH")?,
            dynamic_fallback_on_insufficient: parse_flag("DYNAMIC_FALLBACK_ON_INSUFFICIENT")?,
            chrome_executable: env::var("CHROME_EXECUTABLE").ok().filter(|s| !s.is_empty()),
            max_content_length: parse_var("MAX_CONTENT_LENGTH", 50_000)?,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", 5)?,
            job_max_attempts: parse_var("JOB_MAX_ATTEMPTS", 3)?,
            fetch_max_attempts: parse_var("FETCH_MAX_ATTEMPTS", 3)?,
            summarize_timeout: (summarize_timeout_secs > 0)
                .then(|| Duration::from_secs(summarize_timeout_secs)),
        };

        anyhow::ensure!(config.worker_concurrency > 0, "WORKER_CONCURRENCY must be at least 1");
        anyhow::ensure!(config.job_max_attempts > 0, "JOB_MAX_ATTEMPTS must be at least 1");
        anyhow::ensure!(config.fetch_max_attempts > 0, "FETCH_MAX_ATTEMPTS must be at least 1");

        Ok(config)
    }

    pub fn content_config(&self) -> ContentConfig {
        ContentConfig {
            use_dynamic_fetch: self.use_dynamic_fetch,
            dynamic_fallback_on_insufficient: self.dynamic_fallback_on_insufficient,
            max_content_length: self.max_content_length,
            fetch_max_attempts: self.fetch_max_attempts,
            ..ContentConfig::default()
        }
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            max_attempts: self.job_max_attempts,
            ..QueueOptions::default()
        }
    }

    pub fn worker_config(&self) -> JobWorkerConfig {
        JobWorkerConfig {
            concurrency: self.worker_concurrency,
            ..JobWorkerConfig::default()
        }
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        _ => Ok(default),
    }
}

fn parse_flag(key: &str) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => parse_bool(&raw).with_context(|| format!("{} must be true or false", key)),
        Err(_) => Ok(false),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow::anyhow!("unrecognised boolean: {}", other)),
    }
}
