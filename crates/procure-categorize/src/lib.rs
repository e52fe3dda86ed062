//! Watermark-driven incremental categorization for procure.
//!
//! Each domain (record type) keeps three daily watermarks: ingested,
//! embedded and categorized. This crate moves the categorized watermark
//! forward one day at a time, assigning the top-k nearest catalog
//! categories and a confidence score to every record of the day that has
//! an embedding and no result yet.
//!
//! ## Key Components
//!
//! - [`WatermarkStore`]: Reads and advances per-domain progress dates
//! - [`EligibilitySelector`]: Pending record IDs for one day
//! - [`CategoryIndex`]: In-memory nearest-category lookup
//! - [`SimilarityScorer`]: Top-k categories plus [`confidence`]
//! - [`BatchApplier`]: Write-once persistence of results
//! - [`ParallelBatchOrchestrator`]: Sub-batches over a bounded worker pool
//! - [`PipelineDriver`]: Window computation and the day loop
//! - [`EmbeddingBackfill`]: Fills missing embeddings and advances the embedded watermark
//!
//! ## Guarantees
//!
//! 1. A record's result is written at most once; replays never overwrite
//! 2. The categorized watermark only moves past days processed without errors
//! 3. `categorized <= embedded <= ingested` is checked before every run
//!
//! ## Example
//!
//! ```ignore
//! use procure_categorize::*;
//!
//! let index = Arc::new(CategoryIndex::load(&storage)?);
//! let worker = Arc::new(CategorizeWorker::new(
//!     SimilarityScorer::new(storage.clone(), index, 5),
//!     BatchApplier::new(storage.clone()),
//! ));
//! let orchestrator = Arc::new(ParallelBatchOrchestrator::new(OrchestratorConfig::default()));
//! let driver = PipelineDriver::new(
//!     "tenders",
//!     WatermarkStore::new(storage.clone(), floor),
//!     EligibilitySelector::new(storage.clone()),
//!     orchestrator,
//!     worker,
//! );
//! let summary = driver.run(RunMode::Daily, today, &CancellationToken::new()).await?;
//! ```

pub mod applier;
pub mod backfill;
pub mod catalog;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod scorer;
pub mod selector;
pub mod watermark;

pub use applier::BatchApplier;
pub use backfill::{BackfillDay, BackfillSummary, EmbedCounts, EmbeddingBackfill};
pub use catalog::{cosine_similarity, CategoryIndex};
pub use driver::{
    compute_window, run_domains, DayReport, DriverState, PipelineDriver, RunMode, RunSummary,
    StopReason,
};
pub use error::{CategorizeError, SkipReason};
pub use orchestrator::{
    plan_sub_batches, BatchOutcome, BatchWorker, CategorizeWorker, DayOutcome,
    OrchestratorConfig, ParallelBatchOrchestrator,
};
pub use scorer::{confidence, ScoredBatch, SimilarityScorer};
pub use selector::EligibilitySelector;
pub use watermark::{StoredWatermarks, WatermarkStore};
