//! # procure-embeddings
//!
//! Client side of the embedding provider used to turn record text into
//! fixed-length vectors.
//!
//! ## Features
//! - [`EmbeddingProvider`] trait: the provider contract (`embed(text) -> vector | error`)
//! - [`ApiEmbedder`]: OpenAI-compatible `/embeddings` endpoint client
//! - [`RetryingProvider`]: exponential backoff on rate limits and transient failures
//!
//! Errors are split into rate limits, invalid input and transient failures so
//! callers can retry the first and last and leave the record unembedded on
//! the second.

pub mod api;
pub mod error;
pub mod model;
pub mod retry;

pub use api::{ApiEmbedder, ApiEmbedderConfig};
pub use error::EmbeddingError;
pub use model::{Embedding, EmbeddingProvider};
pub use retry::{RetryConfig, RetryingProvider};
