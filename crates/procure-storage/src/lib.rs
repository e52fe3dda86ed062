//! Storage layer for the procurement categorization engine.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for watermarks, records, embeddings and results
//! - Time-prefixed index keys for day-bounded range scans
//! - Conditional (write-once) result writes under row-level striped locks
//! - Catalog rows holding category embeddings

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{
    decode_vector, encode_vector, CategoryKey, RecordKey, RecordTimeKey, UnstampedKey, WatermarkKey,
};
