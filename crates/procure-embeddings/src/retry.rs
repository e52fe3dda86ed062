//! Retry wrapper for embedding providers.
//!
//! Rate limits and transient failures are retried with exponential backoff;
//! invalid input is returned immediately.

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingProvider};

/// Retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts including the first call
    pub max_attempts: u32,
    /// First backoff interval
    pub initial_interval: Duration,
    /// Give up once this much time has passed
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

/// Provider wrapper that retries retryable errors with backoff.
pub struct RetryingProvider<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: EmbeddingProvider> RetryingProvider<P> {
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_elapsed_time: Some(self.config.max_elapsed),
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for RetryingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut backoff = self.new_backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, provider = %self.inner.name(), "Calling embedding provider");

            match self.inner.embed(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempts >= self.config.max_attempts {
                        error!(error = %e, attempts = attempts, "Max retries exceeded");
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                kind = e.kind(),
                                retry_in_ms = duration.as_millis(),
                                "Embedding call failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}
