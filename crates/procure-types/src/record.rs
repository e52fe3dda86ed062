//! Procurement records, catalog categories and categorization results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProcureError;

/// Metadata for a procurement record.
///
/// The embedding vector and the categorization result live in their own
/// storage rows so that selecting eligible records never moves vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Record identity within its domain
    pub id: String,

    /// Domain (record type) this record belongs to
    pub domain: String,

    /// Free text used to generate the embedding
    #[serde(default)]
    pub text: Option<String>,

    /// Business "last updated" timestamp
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated: Option<DateTime<Utc>>,

    /// When the embedding was written, if it has been
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub embedded_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    /// Create a record with a business timestamp.
    pub fn new(
        domain: impl Into<String>,
        id: impl Into<String>,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            text: None,
            last_updated,
            embedded_at: None,
        }
    }

    /// Attach the text the embedding is generated from.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Timestamp used to bucket the record into a day.
    ///
    /// The business timestamp is authoritative; the embedding creation time
    /// is used only when the business timestamp is absent.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_updated.or(self.embedded_at)
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProcureError> {
        serde_json::to_vec(self).map_err(ProcureError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProcureError> {
        serde_json::from_slice(bytes).map_err(ProcureError::from)
    }
}

/// Write-once categorization result for a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationResult {
    /// Category codes, best match first (length <= top_k)
    pub top_categories: Vec<String>,

    /// Similarities parallel to `top_categories`
    pub top_similarities: Vec<f32>,

    /// Confidence in [0, 1]
    pub confidence: Option<f32>,

    /// When the result was computed (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub categorized_at: DateTime<Utc>,
}

impl CategorizationResult {
    /// Build a result from ranked (code, similarity) pairs.
    pub fn from_ranked(ranked: Vec<(String, f32)>, confidence: f32) -> Self {
        let (top_categories, top_similarities) = ranked.into_iter().unzip();
        Self {
            top_categories,
            top_similarities,
            confidence: Some(confidence),
            categorized_at: Utc::now(),
        }
    }

    /// Best matching category, if any.
    pub fn best(&self) -> Option<&str> {
        self.top_categories.first().map(String::as_str)
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProcureError> {
        serde_json::to_vec(self).map_err(ProcureError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProcureError> {
        serde_json::from_slice(bytes).map_err(ProcureError::from)
    }
}

/// Catalog entry. Read-only from the engine's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Category code (e.g. a CPV code)
    pub code: String,

    /// Human readable label
    #[serde(default)]
    pub label: Option<String>,

    /// Embedding vector for the category description
    pub embedding: Vec<f32>,
}

impl Category {
    /// Create a catalog entry.
    pub fn new(code: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            code: code.into(),
            label: None,
            embedding,
        }
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProcureError> {
        serde_json::to_vec(self).map_err(ProcureError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProcureError> {
        serde_json::from_slice(bytes).map_err(ProcureError::from)
    }
}
