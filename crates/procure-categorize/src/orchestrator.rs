//! Parallel batch orchestration for one day's pending records.
//!
//! Pending IDs are split into `workers` contiguous partitions, each
//! partition is chunked into sub-batches of at most `batch_size`, and the
//! sub-batches are interleaved round-robin across partitions. At most
//! `max_inflight` sub-batches are submitted before the oldest completions
//! are drained, and at most `workers` run at once.
//!
//! Failure is counted per sub-batch: a failed or timed-out sub-batch adds
//! its full size to both `attempted` and `errors`, and the remaining
//! sub-batches keep running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use procure_types::CategorizeSettings;

use crate::applier::BatchApplier;
use crate::error::CategorizeError;
use crate::scorer::SimilarityScorer;

/// Counts reported by a worker for one sub-batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records scored (sub-batch size minus skipped)
    pub attempted: usize,
    /// Result rows actually written
    pub updated: usize,
    /// Records skipped for data problems
    pub skipped: usize,
}

/// Aggregated counts for one day.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DayOutcome {
    /// Pending records selected for the day
    pub selected: usize,
    pub attempted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Records in sub-batches that failed or timed out
    pub errors: usize,
    pub sub_batches: usize,
    pub failed_batches: usize,
    /// Submission stopped early because the run was cancelled
    pub cancelled: bool,
}

impl DayOutcome {
    /// True when every selected record was handled without error.
    pub fn is_complete(&self) -> bool {
        self.errors == 0 && !self.cancelled
    }

    fn record_success(&mut self, outcome: BatchOutcome) {
        self.attempted += outcome.attempted;
        self.updated += outcome.updated;
        self.skipped += outcome.skipped;
    }

    fn record_failure(&mut self, size: usize) {
        self.attempted += size;
        self.errors += size;
        self.failed_batches += 1;
    }
}

/// Scores and applies one sub-batch.
///
/// Implementations are synchronous; the orchestrator runs them on the
/// blocking thread pool.
pub trait BatchWorker: Send + Sync + 'static {
    fn process(&self, domain: &str, ids: &[String]) -> Result<BatchOutcome, CategorizeError>;
}

/// The production worker: score against the catalog, then write once.
pub struct CategorizeWorker {
    scorer: SimilarityScorer,
    applier: BatchApplier,
}

impl CategorizeWorker {
    pub fn new(scorer: SimilarityScorer, applier: BatchApplier) -> Self {
        Self { scorer, applier }
    }
}

impl BatchWorker for CategorizeWorker {
    fn process(&self, domain: &str, ids: &[String]) -> Result<BatchOutcome, CategorizeError> {
        let scored = self.scorer.score_batch(domain, ids)?;
        let updated = self.applier.apply(domain, &scored)?;
        Ok(BatchOutcome {
            attempted: scored.results.len(),
            updated,
            skipped: scored.skipped.len(),
        })
    }
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum IDs per sub-batch
    pub batch_size: usize,
    /// Maximum sub-batches executing at once
    pub workers: usize,
    /// Maximum sub-batches submitted before draining completions
    pub max_inflight: usize,
    /// Per sub-batch time limit
    pub timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            workers: 4,
            max_inflight: 8,
            timeout: Duration::from_secs(120),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&CategorizeSettings> for OrchestratorConfig {
    fn from(settings: &CategorizeSettings) -> Self {
        OrchestratorConfig::default()
            .with_batch_size(settings.batch_size)
            .with_workers(settings.workers)
            .with_max_inflight(settings.max_inflight)
            .with_timeout(Duration::from_secs(settings.worker_timeout_secs))
    }
}

/// Split IDs into sub-batches in round-robin partition order.
///
/// The IDs are cut into `partitions` contiguous partitions of near-equal
/// size, each partition into chunks of at most `batch_size`, and the chunks
/// are then taken one per partition in turn. Every ID appears in exactly
/// one sub-batch.
pub fn plan_sub_batches(ids: Vec<String>, partitions: usize, batch_size: usize) -> Vec<Vec<String>> {
    if ids.is_empty() {
        return Vec::new();
    }
    let partitions = partitions.max(1);
    let batch_size = batch_size.max(1);
    let partition_len = ids.len().div_ceil(partitions);

    let mut queues: Vec<std::vec::IntoIter<Vec<String>>> = ids
        .chunks(partition_len)
        .map(|partition| {
            partition
                .chunks(batch_size)
                .map(|chunk| chunk.to_vec())
                .collect::<Vec<_>>()
                .into_iter()
        })
        .collect();

    let mut plan = Vec::new();
    loop {
        let mut took_any = false;
        for queue in queues.iter_mut() {
            if let Some(batch) = queue.next() {
                plan.push(batch);
                took_any = true;
            }
        }
        if !took_any {
            break;
        }
    }
    plan
}

type SubBatchResult = (usize, Result<BatchOutcome, CategorizeError>);

/// Runs a day's sub-batches on a bounded worker pool.
pub struct ParallelBatchOrchestrator {
    config: OrchestratorConfig,
    /// Shared across every day and domain using this orchestrator
    permits: Arc<Semaphore>,
}

impl ParallelBatchOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Process one day's pending IDs.
    ///
    /// Never fails: worker errors, panics and timeouts are folded into the
    /// returned counts. Cancellation stops submitting new sub-batches and
    /// waits for the ones already running.
    pub async fn run_day<W: BatchWorker>(
        &self,
        worker: Arc<W>,
        domain: &str,
        ids: Vec<String>,
        cancel: &CancellationToken,
    ) -> DayOutcome {
        let mut outcome = DayOutcome {
            selected: ids.len(),
            ..DayOutcome::default()
        };
        let plan = plan_sub_batches(ids, self.config.workers, self.config.batch_size);
        outcome.sub_batches = plan.len();

        debug!(
            domain = %domain,
            records = outcome.selected,
            sub_batches = plan.len(),
            "Planned sub-batches"
        );

        let mut submitted = 0usize;
        let mut inflight: JoinSet<SubBatchResult> = JoinSet::new();

        for batch in plan {
            if cancel.is_cancelled() {
                info!(domain = %domain, "Cancelled, no further sub-batches submitted");
                outcome.cancelled = true;
                break;
            }

            while inflight.len() >= self.config.max_inflight {
                if let Some(joined) = inflight.join_next().await {
                    Self::absorb(&mut outcome, domain, joined);
                }
            }

            submitted += batch.len();
            inflight.spawn(Self::run_sub_batch(
                self.permits.clone(),
                worker.clone(),
                domain.to_string(),
                batch,
                self.config.timeout,
            ));
        }

        while let Some(joined) = inflight.join_next().await {
            Self::absorb(&mut outcome, domain, joined);
        }

        // A sub-batch whose task was lost without reporting still counts.
        let accounted = outcome.attempted + outcome.skipped;
        if accounted < submitted {
            outcome.errors += submitted - accounted;
            outcome.attempted += submitted - accounted;
        }

        outcome
    }

    async fn run_sub_batch<W: BatchWorker>(
        permits: Arc<Semaphore>,
        worker: Arc<W>,
        domain: String,
        batch: Vec<String>,
        timeout: Duration,
    ) -> SubBatchResult {
        let size = batch.len();
        let permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => return (size, Err(CategorizeError::Worker(e.to_string()))),
        };

        // The permit moves into the blocking task so a timed-out sub-batch
        // keeps its slot until the thread actually finishes.
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            worker.process(&domain, &batch)
        });

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(CategorizeError::Worker(join_err.to_string())),
            Err(_) => Err(CategorizeError::Timeout(timeout)),
        };
        (size, result)
    }

    fn absorb(outcome: &mut DayOutcome, domain: &str, joined: Result<SubBatchResult, JoinError>) {
        match joined {
            Ok((_, Ok(batch))) => outcome.record_success(batch),
            Ok((size, Err(e))) => {
                warn!(domain = %domain, size = size, error = %e, "Sub-batch failed");
                outcome.record_failure(size);
            }
            Err(e) => {
                error!(domain = %domain, error = %e, "Sub-batch task lost");
                outcome.failed_batches += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every ID it sees and tracks peak concurrency.
    #[derive(Default)]
    struct RecordingWorker {
        seen: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
        delay: Option<Duration>,
    }

    impl BatchWorker for RecordingWorker {
        fn process(&self, _domain: &str, ids: &[String]) -> Result<BatchOutcome, CategorizeError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.seen.lock().unwrap().extend(ids.iter().cloned());
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(BatchOutcome {
                attempted: ids.len(),
                updated: ids.len(),
                skipped: 0,
            })
        }
    }

    /// Fails any sub-batch containing the poisoned ID.
    struct PoisonWorker {
        poison: String,
    }

    impl BatchWorker for PoisonWorker {
        fn process(&self, _domain: &str, ids: &[String]) -> Result<BatchOutcome, CategorizeError> {
            if ids.contains(&self.poison) {
                return Err(CategorizeError::Worker("poisoned".to_string()));
            }
            Ok(BatchOutcome {
                attempted: ids.len(),
                updated: ids.len(),
                skipped: 0,
            })
        }
    }

    struct SlowWorker;

    impl BatchWorker for SlowWorker {
        fn process(&self, _domain: &str, ids: &[String]) -> Result<BatchOutcome, CategorizeError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(BatchOutcome {
                attempted: ids.len(),
                updated: 0,
                skipped: 0,
            })
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("R-{:05}", i)).collect()
    }

    #[test]
    fn test_plan_round_robin_order() {
        let plan = plan_sub_batches(ids(10), 2, 2);
        let firsts: Vec<&str> = plan.iter().map(|b| b[0].as_str()).collect();
        assert_eq!(
            firsts,
            vec!["R-00000", "R-00005", "R-00002", "R-00007", "R-00004", "R-00009"]
        );
        assert!(plan.iter().all(|b| b.len() <= 2));
    }

    #[test]
    fn test_plan_covers_every_id_once() {
        let plan = plan_sub_batches(ids(1003), 4, 100);
        let flat: Vec<String> = plan.into_iter().flatten().collect();
        assert_eq!(flat.len(), 1003);
        let unique: HashSet<&String> = flat.iter().collect();
        assert_eq!(unique.len(), 1003);
    }

    #[test]
    fn test_plan_fewer_ids_than_partitions() {
        let plan = plan_sub_batches(ids(3), 8, 500);
        assert_eq!(plan.len(), 3);
        assert!(plan_sub_batches(Vec::new(), 4, 500).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_large_day_processed_exactly_once() {
        let config = OrchestratorConfig::default()
            .with_batch_size(500)
            .with_workers(4)
            .with_max_inflight(8);
        let orchestrator = ParallelBatchOrchestrator::new(config);
        let worker = Arc::new(RecordingWorker::default());

        let outcome = orchestrator
            .run_day(worker.clone(), "tenders", ids(10_000), &CancellationToken::new())
            .await;

        assert_eq!(outcome.selected, 10_000);
        assert_eq!(outcome.attempted, 10_000);
        assert_eq!(outcome.updated, 10_000);
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.sub_batches, 20);
        assert!(outcome.is_complete());

        let seen = worker.seen.lock().unwrap();
        assert_eq!(seen.len(), 10_000);
        let unique: HashSet<&String> = seen.iter().collect();
        assert_eq!(unique.len(), 10_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_workers() {
        let config = OrchestratorConfig::default()
            .with_batch_size(10)
            .with_workers(2)
            .with_max_inflight(8);
        let orchestrator = ParallelBatchOrchestrator::new(config);
        let worker = Arc::new(RecordingWorker {
            delay: Some(Duration::from_millis(20)),
            ..RecordingWorker::default()
        });

        let outcome = orchestrator
            .run_day(worker.clone(), "tenders", ids(200), &CancellationToken::new())
            .await;

        assert_eq!(outcome.attempted, 200);
        assert!(worker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_sub_batch_counts_its_size() {
        let config = OrchestratorConfig::default()
            .with_batch_size(10)
            .with_workers(2);
        let orchestrator = ParallelBatchOrchestrator::new(config);
        let worker = Arc::new(PoisonWorker {
            poison: "R-00013".to_string(),
        });

        let outcome = orchestrator
            .run_day(worker, "tenders", ids(40), &CancellationToken::new())
            .await;

        assert_eq!(outcome.attempted, 40);
        assert_eq!(outcome.updated, 30);
        assert_eq!(outcome.errors, 10);
        assert_eq!(outcome.failed_batches, 1);
        assert!(!outcome.is_complete());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_sub_batch_counts_as_error() {
        let config = OrchestratorConfig::default()
            .with_batch_size(5)
            .with_workers(2)
            .with_timeout(Duration::from_millis(50));
        let orchestrator = ParallelBatchOrchestrator::new(config);

        let outcome = orchestrator
            .run_day(Arc::new(SlowWorker), "tenders", ids(5), &CancellationToken::new())
            .await;

        assert_eq!(outcome.errors, 5);
        assert_eq!(outcome.attempted, 5);
        assert_eq!(outcome.failed_batches, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_submits_nothing() {
        let orchestrator = ParallelBatchOrchestrator::new(OrchestratorConfig::default());
        let worker = Arc::new(RecordingWorker::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = orchestrator
            .run_day(worker.clone(), "tenders", ids(50), &cancel)
            .await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.attempted, 0);
        assert!(!outcome.is_complete());
        assert!(worker.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_day() {
        let orchestrator = ParallelBatchOrchestrator::new(OrchestratorConfig::default());
        let outcome = orchestrator
            .run_day(
                Arc::new(RecordingWorker::default()),
                "tenders",
                Vec::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome, DayOutcome::default());
        assert!(outcome.is_complete());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = CategorizeSettings {
            batch_size: 100,
            workers: 3,
            max_inflight: 6,
            worker_timeout_secs: 9,
            ..CategorizeSettings::default()
        };
        let config = OrchestratorConfig::from(&settings);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.workers, 3);
        assert_eq!(config.max_inflight, 6);
        assert_eq!(config.timeout, Duration::from_secs(9));
    }
}
