//! End-to-end test infrastructure for procure.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering watermark-driven categorization from stored embeddings to
//! written results.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use procure_categorize::{
    BatchApplier, BatchOutcome, BatchWorker, CategorizeError, CategorizeWorker, CategoryIndex,
    EligibilitySelector, OrchestratorConfig, ParallelBatchOrchestrator, PipelineDriver,
    SimilarityScorer, WatermarkStore,
};
use procure_embeddings::{Embedding, EmbeddingError, EmbeddingProvider};
use procure_storage::Storage;
use procure_types::{Category, RecordMeta, Stage, WatermarkRow};

/// Shared test harness for E2E tests.
///
/// Holds a scratch RocksDB instance and the floor date used as the
/// default categorized watermark.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Shared storage instance
    pub storage: Arc<Storage>,
    /// Categorized watermark assumed when none is stored
    pub floor: NaiveDate,
}

impl TestHarness {
    /// Create a new test harness with temp directory and storage.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));

        Self {
            _temp_dir: temp_dir,
            storage,
            floor: day(2024, 2, 29),
        }
    }

    pub fn watermarks(&self) -> WatermarkStore {
        WatermarkStore::new(self.storage.clone(), self.floor)
    }

    /// Store catalog categories.
    pub fn seed_categories(&self, categories: &[(&str, Vec<f32>)]) {
        for (code, embedding) in categories {
            self.storage
                .put_category(&Category::new(*code, embedding.clone()))
                .expect("Failed to put category");
        }
    }

    /// Store a record last updated at noon on `on`, with an optional embedding.
    pub fn seed_record(&self, domain: &str, id: &str, on: NaiveDate, embedding: Option<Vec<f32>>) {
        let ts = at_noon(on);
        self.storage
            .put_record(&RecordMeta::new(domain, id, Some(ts)))
            .expect("Failed to put record");
        if let Some(values) = embedding {
            self.storage
                .put_embedding(domain, id, &values, ts)
                .expect("Failed to put embedding");
        }
    }

    /// Store a record with text and no embedding.
    pub fn seed_text_record(&self, domain: &str, id: &str, on: NaiveDate, text: &str) {
        self.storage
            .put_record(&RecordMeta::new(domain, id, Some(at_noon(on))).with_text(text))
            .expect("Failed to put record");
    }

    /// Write a watermark row directly.
    pub fn set_watermark(&self, domain: &str, stage: Stage, date: NaiveDate) {
        self.storage
            .put_watermark(&WatermarkRow::new(domain, stage, date))
            .expect("Failed to put watermark");
    }

    /// Stored watermark, if any.
    pub fn watermark(&self, domain: &str, stage: Stage) -> Option<NaiveDate> {
        self.storage
            .get_watermark(domain, stage)
            .expect("Failed to read watermark")
            .map(|row| row.date)
    }

    /// The production worker over the stored catalog.
    pub fn categorize_worker(&self, top_k: usize) -> Arc<CategorizeWorker> {
        let index = CategoryIndex::load(&self.storage).expect("Failed to load catalog");
        Arc::new(CategorizeWorker::new(
            SimilarityScorer::new(self.storage.clone(), Arc::new(index), top_k),
            BatchApplier::new(self.storage.clone()),
        ))
    }

    /// Driver for `domain` over this harness's storage.
    pub fn driver<W: BatchWorker>(
        &self,
        domain: &str,
        orchestrator: Arc<ParallelBatchOrchestrator>,
        worker: Arc<W>,
    ) -> PipelineDriver<W> {
        PipelineDriver::new(
            domain,
            self.watermarks(),
            EligibilitySelector::new(self.storage.clone()),
            orchestrator,
            worker,
        )
    }

    /// Assert `categorized <= embedded <= ingested <= today` with defaults applied.
    pub fn assert_watermark_order(&self, domain: &str, today: NaiveDate) {
        let watermarks = self.watermarks();
        let categorized = watermarks.get(domain, Stage::Categorized, today);
        let embedded = watermarks.get(domain, Stage::Embedded, today);
        let ingested = watermarks.get(domain, Stage::Ingested, today);
        assert!(
            categorized <= embedded && embedded <= ingested && ingested <= today,
            "watermarks out of order for {}: categorized={} embedded={} ingested={} today={}",
            domain,
            categorized,
            embedded,
            ingested,
            today
        );
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Small orchestrator suitable for tests.
pub fn test_orchestrator(batch_size: usize, workers: usize) -> Arc<ParallelBatchOrchestrator> {
    Arc::new(ParallelBatchOrchestrator::new(
        OrchestratorConfig::default()
            .with_batch_size(batch_size)
            .with_workers(workers)
            .with_max_inflight(workers * 2),
    ))
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn at_noon(on: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&on.and_hms_opt(12, 0, 0).expect("valid time"))
}

/// Unit vector along `axis` in `dim` dimensions.
pub fn unit(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[axis] = 1.0;
    v
}

/// Unit vector with cosine `similarity` to axis `along`, completed on axis `rest`.
pub fn with_similarity(dim: usize, along: usize, rest: usize, similarity: f32) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[along] = similarity;
    v[rest] = (1.0 - similarity * similarity).sqrt();
    v
}

/// Wraps a worker and fails every sub-batch containing a listed ID.
pub struct FailingWorker<W> {
    inner: Arc<W>,
    fail_ids: HashSet<String>,
}

impl<W> FailingWorker<W> {
    pub fn new(inner: Arc<W>, fail_ids: &[&str]) -> Self {
        Self {
            inner,
            fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl<W: BatchWorker> BatchWorker for FailingWorker<W> {
    fn process(&self, domain: &str, ids: &[String]) -> Result<BatchOutcome, CategorizeError> {
        if ids.iter().any(|id| self.fail_ids.contains(id)) {
            return Err(CategorizeError::Worker("injected failure".to_string()));
        }
        self.inner.process(domain, ids)
    }
}

/// Deterministic provider: maps known phrases to fixed vectors.
pub struct PhraseEmbedder {
    phrases: Vec<(String, Vec<f32>)>,
}

impl PhraseEmbedder {
    pub fn new(phrases: &[(&str, Vec<f32>)]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|(p, v)| (p.to_string(), v.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for PhraseEmbedder {
    fn name(&self) -> &str {
        "phrase"
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.phrases
            .iter()
            .find(|(phrase, _)| text.contains(phrase.as_str()))
            .map(|(_, v)| Embedding::new(v.clone()))
            .ok_or_else(|| EmbeddingError::InvalidInput(format!("unknown text: {}", text)))
    }
}
