//! Answer a question from scraped page content.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::kernel::BaseAI;

/// Shortest content worth a model call.
pub const MIN_ANSWERABLE_CONTENT: usize = 20;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("insufficient website content to analyze ({length} characters); the page may not have loaded properly")]
    InsufficientContent { length: usize },

    #[error("no answer received from the model")]
    EmptyResponse,

    #[error("model did not answer within {0:?}")]
    Timeout(Duration),

    #[error("failed to get AI answer: {0}")]
    Model(#[source] anyhow::Error),
}

/// Wraps the answering model with input validation and an optional timeout.
///
/// The model is called once per `answer`; retries belong to the job queue.
pub struct Summarizer {
    ai: Arc<dyn BaseAI>,
    timeout: Option<Duration>,
}

impl Summarizer {
    pub fn new(ai: Arc<dyn BaseAI>, timeout: Option<Duration>) -> Self {
        Self { ai, timeout }
    }

    pub async fn answer(&self, content: &str, question: &str) -> Result<String, SummarizeError> {
        let length = content.trim().chars().count();
        if length < MIN_ANSWERABLE_CONTENT {
            return Err(SummarizeError::InsufficientContent { length });
        }

        let prompt = build_prompt(content, question);
        let call = self.ai.complete(&prompt);

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(timeout = ?limit, "answering model timed out");
                    return Err(SummarizeError::Timeout(limit));
                }
            },
            None => call.await,
        }
        .map_err(SummarizeError::Model)?;

        let answer = reply.trim();
        if answer.is_empty() {
            return Err(SummarizeError::EmptyResponse);
        }

        debug!(answer_len = answer.len(), "answer received");
        Ok(answer.to_string())
    }
}

fn build_prompt(content: &str, question: &str) -> String {
    format!(
        r#"You are a helpful assistant that answers questions based on the provided website content. Be concise, accurate, and descriptive.

Based on the following website content, please answer this question: "{question}"

Website Content:
{content}

Important:
- Answer the question directly using the provided content
- If the content doesn't contain enough information to answer fully, mention what information is available
- Do NOT ask the user to provide content - the content is already provided above
- Be descriptive and informative

Answer:"#
    )
}
