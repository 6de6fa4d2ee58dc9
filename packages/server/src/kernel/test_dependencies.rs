// TestDependencies - mock implementations for testing
//
// Scripted stand-ins for the kernel's external capabilities. Each mock records
// its calls so tests can assert on how often (and with what) it was used.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::jobs::{InMemoryJobQueue, QueueOptions};
use super::scraper::{ContentConfig, ContentService, FetchError, FetchedPage, PageFormat};
use super::{BaseAI, BasePageFetcher, ServerDeps};
use crate::domains::tasks::InMemoryTaskStore;

// =============================================================================
// Mock AI
// =============================================================================

enum MockReply {
    Text(String),
    Error(String),
}

pub struct MockAI {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    default_reply: String,
    delay: Option<Duration>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockAI {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: "Mock answer".to_string(),
            delay: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reply used once the scripted replies run out
    pub fn answering(mut self, reply: &str) -> Self {
        self.default_reply = reply.to_string();
        self
    }

    pub fn with_response(self, reply: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Text(reply.to_string()));
        self
    }

    pub fn with_error(self, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Error(message.to_string()));
        self
    }

    /// Sleep (tokio clock) before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Default for MockAI {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseAI for MockAI {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Error(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(self.default_reply.clone()),
        }
    }
}

// =============================================================================
// Scripted Fetcher
// =============================================================================

/// Fetcher that replays a fixed script of outcomes, one per call.
///
/// When the script is exhausted it repeats the `fallback` outcome if one was
/// set, otherwise it fails with a network error.
pub struct ScriptedFetcher {
    name: &'static str,
    script: Arc<Mutex<VecDeque<Result<FetchedPage, FetchError>>>>,
    fallback: Option<Result<FetchedPage, FetchError>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFetcher {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn then_html(self, html: &str) -> Self {
        self.push(Ok(FetchedPage::html("https://example.com", html)))
    }

    pub fn then_text(self, text: &str) -> Self {
        self.push(Ok(FetchedPage {
            url: "https://example.com".to_string(),
            status: 200,
            body: text.to_string(),
            format: PageFormat::Text,
        }))
    }

    pub fn then_fail(self, error: FetchError) -> Self {
        self.push(Err(error))
    }

    /// Outcome repeated for every call past the end of the script
    pub fn always_fail(mut self, error: FetchError) -> Self {
        self.fallback = Some(Err(error));
        self
    }

    pub fn always_html(mut self, html: &str) -> Self {
        self.fallback = Some(Ok(FetchedPage::html("https://example.com", html)));
        self
    }

    fn push(self, outcome: Result<FetchedPage, FetchError>) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BasePageFetcher for ScriptedFetcher {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(outcome) => outcome,
            None => self
                .fallback
                .clone()
                .unwrap_or_else(|| Err(FetchError::network("no scripted response"))),
        }
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// In-memory stores plus scripted collaborators, wired into a `ServerDeps`.
pub struct TestDependencies {
    pub ai: Arc<MockAI>,
    pub static_fetcher: Arc<ScriptedFetcher>,
    pub dynamic_fetcher: Option<Arc<ScriptedFetcher>>,
    pub tasks: Arc<InMemoryTaskStore>,
    pub job_queue: Arc<InMemoryJobQueue>,
    pub content_config: ContentConfig,
    pub summarize_timeout: Option<Duration>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            ai: Arc::new(MockAI::new()),
            static_fetcher: Arc::new(ScriptedFetcher::new("static")),
            dynamic_fetcher: None,
            tasks: Arc::new(InMemoryTaskStore::new()),
            job_queue: Arc::new(InMemoryJobQueue::new(QueueOptions::default())),
            content_config: ContentConfig::default(),
            summarize_timeout: Some(Duration::from_secs(120)),
        }
    }

    /// Set a mock AI
    pub fn mock_ai(mut self, ai: MockAI) -> Self {
        self.ai = Arc::new(ai);
        self
    }

    /// Set the static-strategy fetcher
    pub fn static_fetcher(mut self, fetcher: ScriptedFetcher) -> Self {
        self.static_fetcher = Arc::new(fetcher);
        self
    }

    /// Set the dynamic-strategy fetcher
    pub fn dynamic_fetcher(mut self, fetcher: ScriptedFetcher) -> Self {
        self.dynamic_fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn content_config(mut self, config: ContentConfig) -> Self {
        self.content_config = config;
        self
    }

    pub fn queue_options(mut self, options: QueueOptions) -> Self {
        self.job_queue = Arc::new(InMemoryJobQueue::new(options));
        self
    }

    pub fn summarize_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.summarize_timeout = timeout;
        self
    }

    /// Convert into ServerDeps, keeping `self`'s handles for assertions
    pub fn server_deps(&self) -> Arc<ServerDeps> {
        let content = ContentService::new(
            self.static_fetcher.clone(),
            self.dynamic_fetcher
                .clone()
                .map(|fetcher| fetcher as Arc<dyn BasePageFetcher>),
            self.content_config.clone(),
        );

        Arc::new(ServerDeps::new(
            None,
            self.tasks.clone(),
            self.job_queue.clone(),
            Arc::new(content),
            self.ai.clone(),
            self.summarize_timeout,
        ))
    }

    pub fn into_server_deps(self) -> Arc<ServerDeps> {
        self.server_deps()
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
