//! Embedding backfill stage.
//!
//! Walks days after the embedded watermark, embeds every record of the day
//! that has text and no embedding yet, and advances the embedded watermark
//! when the day finished without provider or storage errors. Records the
//! provider rejects as invalid input are skipped and stay unembedded.
//!
//! Records with no timestamp belong to no day. They are embedded in a
//! separate pass after the days, and the embedding time then places them
//! on a day for categorization.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use procure_embeddings::{Embedding, EmbeddingError, EmbeddingProvider};
use procure_storage::Storage;
use procure_types::{day_bounds_ms, next_day, RecordMeta, Stage};

use crate::driver::{compute_window, StopReason};
use crate::error::CategorizeError;
use crate::watermark::WatermarkStore;

/// Counts for one group of records sent to the provider.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedCounts {
    /// Records without an embedding
    pub selected: usize,
    pub embedded: usize,
    /// Records without text or rejected by the provider
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: bool,
}

/// Outcome of one backfilled day.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillDay {
    pub day: NaiveDate,
    /// Records in the day without an embedding
    pub selected: usize,
    pub embedded: usize,
    /// Records without text or rejected by the provider
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub advanced: bool,
}

impl BackfillDay {
    fn from_counts(day: NaiveDate, counts: EmbedCounts) -> Self {
        Self {
            day,
            selected: counts.selected,
            embedded: counts.embedded,
            skipped: counts.skipped,
            errors: counts.errors,
            cancelled: counts.cancelled,
            advanced: false,
        }
    }
}

/// Outcome of one backfill run for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub domain: String,
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub days: Vec<BackfillDay>,
    /// Records with no timestamp, embedded after the days
    pub unstamped: EmbedCounts,
    pub stopped: Option<StopReason>,
}

impl BackfillSummary {
    /// False when a day stopped the run or an unstamped record failed.
    pub fn completed(&self) -> bool {
        self.stopped.is_none() && self.unstamped.errors == 0
    }

    pub fn embedded(&self) -> usize {
        self.days.iter().map(|d| d.embedded).sum::<usize>() + self.unstamped.embedded
    }
}

/// Fills in missing embeddings day by day.
pub struct EmbeddingBackfill {
    storage: Arc<Storage>,
    provider: Arc<dyn EmbeddingProvider>,
    watermarks: WatermarkStore,
    concurrency: usize,
}

impl EmbeddingBackfill {
    pub fn new(
        storage: Arc<Storage>,
        provider: Arc<dyn EmbeddingProvider>,
        watermarks: WatermarkStore,
        concurrency: usize,
    ) -> Self {
        Self {
            storage,
            provider,
            watermarks,
            concurrency: concurrency.max(1),
        }
    }

    /// Backfill one domain up to the ingested watermark, then embed the
    /// domain's unstamped records.
    ///
    /// A missing embedded watermark starts from the configured floor.
    /// Unstamped records never move the embedded watermark.
    pub async fn run(
        &self,
        domain: &str,
        today: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<BackfillSummary, CategorizeError> {
        self.watermarks.stored(domain).check_order(domain)?;

        let progress = self
            .watermarks
            .get_or(domain, Stage::Embedded, self.watermarks.floor());
        let ingested = self.watermarks.get(domain, Stage::Ingested, today);
        let window = compute_window(progress, ingested, today);

        let mut summary = BackfillSummary {
            domain: domain.to_string(),
            window,
            days: Vec::new(),
            unstamped: EmbedCounts::default(),
            stopped: None,
        };

        match window {
            Some((start, end)) => self.run_days(domain, start, end, cancel, &mut summary).await?,
            None => info!(domain = %domain, embedded = %progress, "No days to backfill"),
        }

        if summary.stopped.is_none() {
            let records = self.storage.unstamped_records(domain)?;
            if !records.is_empty() {
                let counts = self.embed_records(domain, records, cancel).await;
                info!(
                    domain = %domain,
                    selected = counts.selected,
                    embedded = counts.embedded,
                    skipped = counts.skipped,
                    errors = counts.errors,
                    "Unstamped records backfilled"
                );
                if counts.cancelled {
                    summary.stopped = Some(StopReason::Cancelled(today));
                }
                summary.unstamped = counts;
            }
        }

        Ok(summary)
    }

    async fn run_days(
        &self,
        domain: &str,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
        summary: &mut BackfillSummary,
    ) -> Result<(), CategorizeError> {
        info!(domain = %domain, start = %start, end = %end, provider = %self.provider.name(), "Backfilling embeddings");

        let mut day = start;
        loop {
            if cancel.is_cancelled() {
                summary.stopped = Some(StopReason::Cancelled(day));
                break;
            }

            let (start_ms, end_ms) = day_bounds_ms(day);
            let records = self
                .storage
                .missing_embedding_records(domain, start_ms, end_ms)?;
            let counts = self.embed_records(domain, records, cancel).await;
            let mut report = BackfillDay::from_counts(day, counts);
            info!(
                domain = %domain,
                day = %day,
                selected = report.selected,
                embedded = report.embedded,
                skipped = report.skipped,
                errors = report.errors,
                "Day backfilled"
            );

            if report.cancelled {
                summary.stopped = Some(StopReason::Cancelled(day));
                summary.days.push(report);
                break;
            }
            if report.errors > 0 {
                warn!(domain = %domain, day = %day, "Backfill day incomplete, watermark not advanced");
                summary.stopped = Some(StopReason::DayFailed(day));
                summary.days.push(report);
                break;
            }

            report.advanced = self.watermarks.set(domain, Stage::Embedded, day);
            summary.days.push(report);

            if day >= end {
                break;
            }
            day = next_day(day);
        }
        Ok(())
    }

    async fn embed_records(
        &self,
        domain: &str,
        records: Vec<RecordMeta>,
        cancel: &CancellationToken,
    ) -> EmbedCounts {
        let mut counts = EmbedCounts {
            selected: records.len(),
            ..EmbedCounts::default()
        };

        let mut work = Vec::with_capacity(records.len());
        for record in records {
            match record.text {
                Some(text) if !text.trim().is_empty() => work.push((record.id, text)),
                _ => {
                    debug!(domain = %domain, id = %record.id, "No text to embed, skipping");
                    counts.skipped += 1;
                }
            }
        }
        let expected = work.len();

        let provider = &self.provider;
        let results: Vec<(String, Result<Embedding, EmbeddingError>)> =
            stream::iter(work)
                .map(|(id, text)| async move {
                    let result = provider.embed(&text).await;
                    (id, result)
                })
                .buffer_unordered(self.concurrency)
                .take_until(cancel.cancelled())
                .collect()
                .await;

        counts.cancelled = results.len() < expected;

        for (id, result) in results {
            match result {
                Ok(embedding) => {
                    match self
                        .storage
                        .put_embedding(domain, &id, &embedding.values, Utc::now())
                    {
                        Ok(()) => counts.embedded += 1,
                        Err(e) => {
                            warn!(domain = %domain, id = %id, error = %e, "Failed to store embedding");
                            counts.errors += 1;
                        }
                    }
                }
                Err(e @ (EmbeddingError::InvalidInput(_) | EmbeddingError::Parse(_))) => {
                    warn!(domain = %domain, id = %id, error = %e, "Embedding rejected, skipping record");
                    counts.skipped += 1;
                }
                Err(e) => {
                    warn!(domain = %domain, id = %id, kind = e.kind(), error = %e, "Embedding failed");
                    counts.errors += 1;
                }
            }
        }

        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tempfile::TempDir;

    /// Embeds text by length; rejects text containing "reject", fails on "down".
    struct FakeProvider;

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            if text.contains("reject") {
                return Err(EmbeddingError::InvalidInput("rejected".to_string()));
            }
            if text.contains("down") {
                return Err(EmbeddingError::Transient("503".to_string()));
            }
            Ok(Embedding::new(vec![text.len() as f32, 1.0]))
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (EmbeddingBackfill, Arc<Storage>, WatermarkStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let watermarks = WatermarkStore::new(storage.clone(), day(2024, 3, 1));
        let backfill =
            EmbeddingBackfill::new(storage.clone(), Arc::new(FakeProvider), watermarks.clone(), 2);
        (backfill, storage, watermarks, temp)
    }

    fn seed(storage: &Storage, id: &str, on: NaiveDate, text: Option<&str>) {
        let ts = Utc.from_utc_datetime(&on.and_hms_opt(8, 0, 0).unwrap());
        let mut record = RecordMeta::new("tenders", id, Some(ts));
        if let Some(text) = text {
            record = record.with_text(text);
        }
        storage.put_record(&record).unwrap();
    }

    #[tokio::test]
    async fn test_backfill_embeds_and_advances() {
        let (backfill, storage, watermarks, _temp) = setup();
        watermarks.set("tenders", Stage::Ingested, day(2024, 3, 3));
        seed(&storage, "T-1", day(2024, 3, 2), Some("road works"));
        seed(&storage, "T-2", day(2024, 3, 2), None);
        seed(&storage, "T-3", day(2024, 3, 3), Some("please reject"));

        let summary = backfill
            .run("tenders", day(2024, 3, 10), &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.completed());
        assert_eq!(summary.embedded(), 1);
        assert_eq!(summary.days[0].skipped, 1);
        assert_eq!(summary.days[1].skipped, 1);
        assert_eq!(
            watermarks.try_get("tenders", Stage::Embedded).unwrap(),
            Some(day(2024, 3, 3))
        );

        let rows = storage
            .get_embeddings("tenders", &["T-1".to_string(), "T-3".to_string()])
            .unwrap();
        assert!(rows[0].is_some());
        assert!(rows[1].is_none());
    }

    #[tokio::test]
    async fn test_backfill_stops_on_provider_failure() {
        let (backfill, storage, watermarks, _temp) = setup();
        watermarks.set("tenders", Stage::Ingested, day(2024, 3, 4));
        seed(&storage, "T-1", day(2024, 3, 2), Some("server down"));
        seed(&storage, "T-2", day(2024, 3, 3), Some("office chairs"));

        let summary = backfill
            .run("tenders", day(2024, 3, 10), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.stopped, Some(StopReason::DayFailed(day(2024, 3, 2))));
        assert_eq!(summary.days.len(), 1);
        assert_eq!(watermarks.try_get("tenders", Stage::Embedded).unwrap(), None);
    }

    #[tokio::test]
    async fn test_backfill_embeds_unstamped_records() {
        let (backfill, storage, watermarks, _temp) = setup();
        watermarks.set("tenders", Stage::Ingested, day(2024, 3, 2));
        watermarks.set("tenders", Stage::Embedded, day(2024, 3, 2));
        storage
            .put_record(&RecordMeta::new("tenders", "T-9", None).with_text("fuel supply"))
            .unwrap();
        storage
            .put_record(&RecordMeta::new("tenders", "T-10", None))
            .unwrap();

        let summary = backfill
            .run("tenders", day(2024, 3, 10), &CancellationToken::new())
            .await
            .unwrap();

        // Days are caught up; only the unstamped pass ran
        assert!(summary.window.is_none());
        assert!(summary.completed());
        assert_eq!(summary.unstamped.selected, 2);
        assert_eq!(summary.unstamped.embedded, 1);
        assert_eq!(summary.unstamped.skipped, 1);
        assert_eq!(summary.embedded(), 1);
        assert_eq!(
            watermarks.try_get("tenders", Stage::Embedded).unwrap(),
            Some(day(2024, 3, 2))
        );

        let record = storage.get_record("tenders", "T-9").unwrap().unwrap();
        assert!(record.embedded_at.is_some());
        assert_eq!(storage.unstamped_records("tenders").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backfill_unstamped_failure_is_incomplete() {
        let (backfill, storage, watermarks, _temp) = setup();
        watermarks.set("tenders", Stage::Ingested, day(2024, 3, 2));
        watermarks.set("tenders", Stage::Embedded, day(2024, 3, 2));
        storage
            .put_record(&RecordMeta::new("tenders", "T-9", None).with_text("server down"))
            .unwrap();

        let summary = backfill
            .run("tenders", day(2024, 3, 10), &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.stopped.is_none());
        assert!(!summary.completed());
        assert_eq!(summary.unstamped.errors, 1);
        assert_eq!(storage.unstamped_records("tenders").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backfill_caught_up() {
        let (backfill, _storage, watermarks, _temp) = setup();
        watermarks.set("tenders", Stage::Ingested, day(2024, 3, 4));
        watermarks.set("tenders", Stage::Embedded, day(2024, 3, 4));

        let summary = backfill
            .run("tenders", day(2024, 3, 10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.window.is_none());
        assert!(summary.completed());
    }
}
