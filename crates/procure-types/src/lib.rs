//! # procure-types
//!
//! Shared domain types for the procurement categorization engine.
//!
//! This crate defines the core data structures used throughout the system:
//! - Watermarks: Per-domain, per-stage progress markers (calendar dates)
//! - Records: Procurement entities and their write-once categorization results
//! - Categories: Catalog entries with their embedding vectors
//! - Settings: Layered configuration for the whole pipeline
//!
//! ## Usage
//!
//! ```rust
//! use procure_types::{Stage, format_day, parse_day};
//!
//! let day = parse_day("20240131").unwrap();
//! assert_eq!(format_day(day), "20240131");
//! assert_eq!(Stage::Categorized.to_string(), "categorized");
//! ```

pub mod config;
pub mod error;
pub mod record;
pub mod watermark;

pub use config::{CategorizeSettings, EmbeddingSettings, Settings};
pub use error::ProcureError;
pub use record::{CategorizationResult, Category, RecordMeta};
pub use watermark::{day_bounds_ms, format_day, next_day, parse_day, Stage, WatermarkRow};
