//! Key encoding and decoding for storage layer.
//!
//! Key formats:
//! - `wm:{domain}:{stage}` for watermarks
//! - `rec:{domain}:{id}`, `emb:{domain}:{id}`, `res:{domain}:{id}` for record rows
//! - `rt:{domain}:{timestamp_ms:013}:{id}` for the day-bucketing index
//! - `ru:{domain}:{id}` for records with no timestamp yet
//! - `cat:{code}` for catalog entries
//!
//! The zero-padded timestamp makes lexicographic order match time order,
//! so a day is a single forward range scan.

use procure_types::Stage;

use crate::error::StorageError;

/// Key for watermark rows
/// Format: wm:{domain}:{stage}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkKey {
    pub domain: String,
    pub stage: Stage,
}

impl WatermarkKey {
    pub fn new(domain: impl Into<String>, stage: Stage) -> Self {
        Self {
            domain: domain.into(),
            stage,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("wm:{}:{}", self.domain, self.stage.as_str()).into_bytes()
    }
}

/// Key for the per-record rows (metadata, embedding, result).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    pub domain: String,
    pub id: String,
}

impl RecordKey {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            id: id.into(),
        }
    }

    /// Metadata row key: rec:{domain}:{id}
    pub fn meta_bytes(&self) -> Vec<u8> {
        format!("rec:{}:{}", self.domain, self.id).into_bytes()
    }

    /// Embedding row key: emb:{domain}:{id}
    pub fn embedding_bytes(&self) -> Vec<u8> {
        format!("emb:{}:{}", self.domain, self.id).into_bytes()
    }

    /// Result row key: res:{domain}:{id}
    pub fn result_bytes(&self) -> Vec<u8> {
        format!("res:{}:{}", self.domain, self.id).into_bytes()
    }
}

/// Key for the timestamp index
/// Format: rt:{domain}:{timestamp_ms:013}:{id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTimeKey {
    pub domain: String,
    /// Effective timestamp in milliseconds (clamped at the epoch)
    pub timestamp_ms: i64,
    pub id: String,
}

impl RecordTimeKey {
    pub fn new(domain: impl Into<String>, timestamp_ms: i64, id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            timestamp_ms: timestamp_ms.max(0),
            id: id.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("rt:{}:{:013}:{}", self.domain, self.timestamp_ms, self.id).into_bytes()
    }

    /// Decode a key known to belong to `domain`.
    pub fn from_bytes(domain: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let prefix = format!("rt:{}:", domain);
        let rest = s
            .strip_prefix(&prefix)
            .ok_or_else(|| StorageError::Key(format!("Invalid record time key: {}", s)))?;
        let (ts, id) = rest
            .split_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid record time key: {}", s)))?;
        let timestamp_ms: i64 = ts
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid timestamp: {}", e)))?;
        Ok(Self {
            domain: domain.to_string(),
            timestamp_ms,
            id: id.to_string(),
        })
    }

    /// Generate prefix for time range scan start
    pub fn prefix_start(domain: &str, start_ms: i64) -> Vec<u8> {
        format!("rt:{}:{:013}:", domain, start_ms.max(0)).into_bytes()
    }

    /// Generate prefix for time range scan end (exclusive)
    pub fn prefix_end(domain: &str, end_ms: i64) -> Vec<u8> {
        format!("rt:{}:{:013}:", domain, end_ms.max(0)).into_bytes()
    }
}

/// Key for records that cannot be placed on a day yet
/// Format: ru:{domain}:{id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnstampedKey {
    pub domain: String,
    pub id: String,
}

impl UnstampedKey {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            id: id.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("ru:{}:{}", self.domain, self.id).into_bytes()
    }

    pub fn prefix(domain: &str) -> Vec<u8> {
        format!("ru:{}:", domain).into_bytes()
    }

    /// Decode a key known to belong to `domain`.
    pub fn from_bytes(domain: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let id = s
            .strip_prefix(&format!("ru:{}:", domain))
            .ok_or_else(|| StorageError::Key(format!("Invalid unstamped key: {}", s)))?;
        Ok(Self::new(domain, id))
    }
}

/// Key for catalog categories
/// Format: cat:{code}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryKey {
    pub code: String,
}

impl CategoryKey {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("cat:{}", self.code).into_bytes()
    }
}

/// Encode a vector as little-endian f32 bytes.
pub fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Fails on a truncated payload.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, StorageError> {
    if bytes.len() % 4 != 0 {
        return Err(StorageError::Serialization(format!(
            "vector payload of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
