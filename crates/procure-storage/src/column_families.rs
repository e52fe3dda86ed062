//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - watermarks: Per (domain, stage) progress markers (default compaction)
//! - records: Record metadata without vectors (default compaction)
//! - record_times: Day-bucketing index on the effective timestamp
//! - embeddings: Raw f32 vectors (compressed, read only by scorers)
//! - results: Write-once categorization results
//! - categories: Catalog entries with their vectors

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for watermark rows
pub const CF_WATERMARKS: &str = "watermarks";

/// Column family name for record metadata
pub const CF_RECORDS: &str = "records";

/// Column family name for the timestamp index
pub const CF_RECORD_TIMES: &str = "record_times";

/// Column family name for record embeddings
pub const CF_EMBEDDINGS: &str = "embeddings";

/// Column family name for categorization results
pub const CF_RESULTS: &str = "results";

/// Column family name for catalog categories
pub const CF_CATEGORIES: &str = "categories";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_WATERMARKS,
    CF_RECORDS,
    CF_RECORD_TIMES,
    CF_EMBEDDINGS,
    CF_RESULTS,
    CF_CATEGORIES,
];

/// Create column family options for vector payloads (large, compressed)
fn embeddings_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_WATERMARKS, Options::default()),
        ColumnFamilyDescriptor::new(CF_RECORDS, Options::default()),
        ColumnFamilyDescriptor::new(CF_RECORD_TIMES, Options::default()),
        ColumnFamilyDescriptor::new(CF_EMBEDDINGS, embeddings_options()),
        ColumnFamilyDescriptor::new(CF_RESULTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_CATEGORIES, embeddings_options()),
    ]
}
