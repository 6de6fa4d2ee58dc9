//! Error types for the chat-completions client.

use thiserror::Error;

/// Result type for OpenAI client operations.
pub type Result<T> = std::result::Result<T, OpenAIError>;

/// OpenAI client errors.
#[derive(Debug, Error)]
pub enum OpenAIError {
    /// The request did not complete within the HTTP client's timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Network error (connection refused, DNS, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response, rate limit, invalid request)
    #[error("API error: {0}")]
    Api(String),

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for OpenAIError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OpenAIError::Timeout(e.to_string())
        } else {
            OpenAIError::Network(e.to_string())
        }
    }
}
