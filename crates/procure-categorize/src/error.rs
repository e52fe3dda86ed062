//! Error types for the categorization engine.

use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use procure_embeddings::EmbeddingError;
use procure_storage::StorageError;
use procure_types::ProcureError;
use thiserror::Error;

/// Errors that can occur in the categorization engine
#[derive(Error, Debug)]
pub enum CategorizeError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Domain type or date handling failed
    #[error("Types error: {0}")]
    Types(#[from] ProcureError),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Stored watermarks are out of order for a domain
    #[error("Watermark invariant violated for {domain}: {detail}")]
    InvariantViolation { domain: String, detail: String },

    /// An explicit range whose start is after its end
    #[error("Inverted window: from {from} is after to {to}")]
    InvertedWindow { from: NaiveDate, to: NaiveDate },

    /// No categories to score against
    #[error("Category catalog is empty")]
    EmptyCatalog,

    /// Catalog rows cannot form a usable index
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// A sub-batch did not finish in time
    #[error("Sub-batch timed out after {0:?}")]
    Timeout(Duration),

    /// A worker task panicked or was cancelled
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Why a record was left out of a scored batch.
///
/// These are data problems: the record is counted as skipped and stays
/// unprocessed, so a later run can pick it up once the data is fixed.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// No embedding row exists
    MissingEmbedding,
    /// The embedding payload could not be decoded
    Malformed(String),
    /// Embedding length differs from the catalog dimension
    DimensionMismatch { expected: usize, actual: usize },
    /// The embedding holds NaN or infinite values
    NonFinite,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingEmbedding => write!(f, "missing embedding"),
            SkipReason::Malformed(msg) => write!(f, "malformed embedding: {}", msg),
            SkipReason::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch: expected {}, got {}", expected, actual)
            }
            SkipReason::NonFinite => write!(f, "non-finite embedding"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CategorizeError::InvertedWindow {
            from: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Inverted window: from 2024-03-05 is after to 2024-03-01"
        );

        let err = CategorizeError::EmptyCatalog;
        assert_eq!(err.to_string(), "Category catalog is empty");

        let err = CategorizeError::Worker("panicked".to_string());
        assert_eq!(err.to_string(), "Worker error: panicked");
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::DimensionMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(reason.to_string(), "dimension mismatch: expected 3, got 2");
        assert_eq!(SkipReason::MissingEmbedding.to_string(), "missing embedding");
    }
}
