//! Error types for the procurement categorization engine.

use thiserror::Error;

/// Unified error type for domain-level operations.
#[derive(Debug, Error)]
pub enum ProcureError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Date string could not be parsed
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
