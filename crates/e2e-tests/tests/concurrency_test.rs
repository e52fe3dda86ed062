//! E2E concurrency tests for procure.
//!
//! Verifies that results are written exactly once when runs overlap and
//! that large days are fully covered by the parallel orchestrator.

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use e2e_tests::{day, test_orchestrator, unit, TestHarness};
use procure_categorize::{run_domains, EligibilitySelector, RunMode};
use procure_types::Stage;

const DIM: usize = 4;

fn seed_catalog(harness: &TestHarness) {
    harness.seed_categories(&[
        ("45000000", unit(DIM, 0)),
        ("33000000", unit(DIM, 1)),
        ("79000000", unit(DIM, 2)),
        ("90000000", unit(DIM, 3)),
    ]);
}

/// Record `i` leans toward category `i % DIM` with a small spread on the
/// next axis so similarities are not all identical.
fn record_vector(i: usize) -> Vec<f32> {
    let mut v = unit(DIM, i % DIM);
    v[(i + 1) % DIM] = 0.1 + (i % 7) as f32 * 0.05;
    v
}

fn seed_day(harness: &TestHarness, domain: &str, count: usize) {
    let on = day(2024, 3, 1);
    for i in 0..count {
        let id = format!("R-{:05}", i);
        harness.seed_record(domain, &id, on, Some(record_vector(i)));
    }
    harness.set_watermark(domain, Stage::Ingested, on);
    harness.set_watermark(domain, Stage::Embedded, on);
}

/// Test: two overlapping runs over the same day write each result once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_runs_write_once() {
    let harness = TestHarness::new();
    let domain = "tenders";
    let today = day(2024, 3, 5);
    seed_catalog(&harness);
    seed_day(&harness, domain, 400);

    let worker = harness.categorize_worker(3);
    let first = harness.driver(domain, test_orchestrator(25, 4), worker.clone());
    let second = harness.driver(domain, test_orchestrator(25, 4), worker);
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        first.run(RunMode::Daily, today, &cancel),
        second.run(RunMode::Daily, today, &cancel)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.completed());
    assert!(b.completed());
    // Whichever run got there first wrote the row; the other was a no-op
    assert_eq!(a.totals().updated + b.totals().updated, 400);
    assert_eq!(harness.watermark(domain, Stage::Categorized), Some(day(2024, 3, 1)));

    let selector = EligibilitySelector::new(harness.storage.clone());
    assert!(selector
        .select_pending(domain, day(2024, 3, 1))
        .unwrap()
        .is_empty());
}

/// Test: a large day is split into sub-batches and every record is
/// categorized exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_day_fully_covered() {
    let harness = TestHarness::new();
    let domain = "tenders";
    seed_catalog(&harness);
    seed_day(&harness, domain, 2_000);

    let driver = harness.driver(domain, test_orchestrator(100, 4), harness.categorize_worker(2));
    let summary = driver
        .run(RunMode::Daily, day(2024, 3, 5), &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.completed());
    let outcome = &summary.days[0].outcome;
    assert_eq!(outcome.selected, 2_000);
    assert_eq!(outcome.attempted, 2_000);
    assert_eq!(outcome.updated, 2_000);
    assert_eq!(outcome.sub_batches, 20);
    assert_eq!(outcome.errors, 0);

    for i in [0usize, 1, 2, 3, 999, 1_998] {
        let id = format!("R-{:05}", i);
        let result = harness.storage.get_result(domain, &id).unwrap().unwrap();
        assert_eq!(result.top_categories.len(), 2);
        let expected = ["45000000", "33000000", "79000000", "90000000"][i % DIM];
        assert_eq!(result.best(), Some(expected));
        let confidence = result.confidence.unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }
}

/// Test: domains sharing one orchestrator all finish.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_domains_share_worker_pool() {
    let harness = TestHarness::new();
    let today = day(2024, 3, 5);
    seed_catalog(&harness);

    let domains = ["tenders", "awards", "contracts"];
    for domain in domains {
        seed_day(&harness, domain, 150);
    }

    let orchestrator = test_orchestrator(20, 2);
    let worker = harness.categorize_worker(2);
    let drivers: Vec<_> = domains
        .iter()
        .map(|d| harness.driver(d, orchestrator.clone(), worker.clone()))
        .collect();

    let results = run_domains(&drivers, RunMode::Daily, today, &CancellationToken::new()).await;

    for (domain, result) in domains.iter().zip(results) {
        let summary = result.unwrap();
        assert_eq!(summary.domain, *domain);
        assert!(summary.completed());
        assert_eq!(summary.totals().updated, 150);
        harness.assert_watermark_order(domain, today);
    }
}
