//! Embedding error types.

use thiserror::Error;

/// Errors returned by an embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider asked us to slow down (HTTP 429)
    #[error("Rate limited by embedding provider")]
    RateLimited,

    /// Provider rejected the text; retrying will not help
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Network failure, timeout or server-side error
    #[error("Transient error: {0}")]
    Transient(String),

    /// Response could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Client misconfiguration (missing key, bad URL)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EmbeddingError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::RateLimited | EmbeddingError::Transient(_))
    }

    /// Short machine-readable kind for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingError::RateLimited => "rate_limited",
            EmbeddingError::InvalidInput(_) => "invalid_input",
            EmbeddingError::Transient(_) => "transient",
            EmbeddingError::Parse(_) => "parse",
            EmbeddingError::Config(_) => "config",
        }
    }
}
