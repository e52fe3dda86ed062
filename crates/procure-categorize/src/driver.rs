//! Pipeline driver: turns watermarks into a window of days and walks it.
//!
//! ```text
//! Idle -> ComputingWindow -> ProcessingDay(d) -> AdvancingWatermark(d) -> ProcessingDay(d+1) ...
//!                                   |                                          |
//!                                   +---- errors > 0 or cancelled -> Done <----+
//! ```
//!
//! A day advances the categorized watermark only when every selected record
//! was handled without error. The first failed day ends the run; later days
//! are left for the next run so the watermark never skips unfinished work.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use procure_types::{next_day, Stage};

use crate::error::CategorizeError;
use crate::orchestrator::{BatchWorker, DayOutcome, ParallelBatchOrchestrator};
use crate::selector::EligibilitySelector;
use crate::watermark::WatermarkStore;

/// Which days a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// From the day after the categorized watermark to the newest day
    /// every upstream stage has finished.
    Daily,
    /// An explicit inclusive range, clamped to today. Days past the
    /// upstream watermarks are processed but never move the categorized
    /// watermark.
    Range { from: NaiveDate, to: NaiveDate },
}

/// Driver lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    ComputingWindow,
    ProcessingDay(NaiveDate),
    AdvancingWatermark(NaiveDate),
    Done,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => write!(f, "idle"),
            DriverState::ComputingWindow => write!(f, "computing_window"),
            DriverState::ProcessingDay(day) => write!(f, "processing_day({})", day),
            DriverState::AdvancingWatermark(day) => write!(f, "advancing_watermark({})", day),
            DriverState::Done => write!(f, "done"),
        }
    }
}

/// Inclusive window of days to process, or `None` when there is nothing to do.
///
/// `progress` is the last finished day of the stage being driven and
/// `upstream` the last finished day of the stage it depends on. A progress
/// watermark equal to today is reprocessed, since today may still receive
/// records.
pub fn compute_window(
    progress: NaiveDate,
    upstream: NaiveDate,
    today: NaiveDate,
) -> Option<(NaiveDate, NaiveDate)> {
    let start = if progress == today {
        progress
    } else {
        next_day(progress)
    };
    let end = upstream.min(today);
    if start > end {
        None
    } else {
        Some((start, end))
    }
}

/// Result of offering a finished day to the categorized watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    Moved,
    /// The day is neither the watermark nor the day after it
    NotAdjacent,
    /// An upstream stage has not finished the day
    BeyondUpstream,
    WriteFailed,
}

/// In-run position of the categorized watermark.
///
/// A finished day moves the watermark only when it equals the watermark or
/// the day after it, and is no later than `limit`, the last day every
/// upstream stage has finished. A failed write leaves the position where it
/// was, so the same day is offered again and later days cannot skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AdvanceCursor {
    position: NaiveDate,
    limit: NaiveDate,
}

impl AdvanceCursor {
    fn new(position: NaiveDate, limit: NaiveDate) -> Self {
        Self { position, limit }
    }

    fn position(&self) -> NaiveDate {
        self.position
    }

    fn limit(&self) -> NaiveDate {
        self.limit
    }

    /// Offer `day`; `write` persists the new watermark and reports success.
    fn advance(&mut self, day: NaiveDate, write: impl FnOnce(NaiveDate) -> bool) -> Advance {
        if day != self.position && day != next_day(self.position) {
            return Advance::NotAdjacent;
        }
        if day > self.limit {
            return Advance::BeyondUpstream;
        }
        if !write(day) {
            return Advance::WriteFailed;
        }
        self.position = day;
        Advance::Moved
    }
}

/// Why a run ended before the end of its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The day had sub-batch errors
    DayFailed(NaiveDate),
    /// Cancellation was requested while the day was pending or running
    Cancelled(NaiveDate),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::DayFailed(day) => write!(f, "day {} had errors", day),
            StopReason::Cancelled(day) => write!(f, "cancelled at day {}", day),
        }
    }
}

/// Outcome of one processed day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayReport {
    pub day: NaiveDate,
    pub outcome: DayOutcome,
    /// The categorized watermark was durably moved to this day
    pub advanced: bool,
}

/// Outcome of one driver run for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub domain: String,
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub days: Vec<DayReport>,
    pub watermark_before: NaiveDate,
    pub watermark_after: NaiveDate,
    pub stopped: Option<StopReason>,
}

impl RunSummary {
    /// True when every day in the window was processed.
    pub fn completed(&self) -> bool {
        self.stopped.is_none()
    }

    /// Sum of the per-day counts.
    pub fn totals(&self) -> DayOutcome {
        let mut totals = DayOutcome::default();
        for report in &self.days {
            totals.selected += report.outcome.selected;
            totals.attempted += report.outcome.attempted;
            totals.updated += report.outcome.updated;
            totals.skipped += report.outcome.skipped;
            totals.errors += report.outcome.errors;
            totals.sub_batches += report.outcome.sub_batches;
            totals.failed_batches += report.outcome.failed_batches;
            totals.cancelled |= report.outcome.cancelled;
        }
        totals
    }
}

/// Drives categorization for one domain.
pub struct PipelineDriver<W> {
    domain: String,
    watermarks: WatermarkStore,
    selector: EligibilitySelector,
    orchestrator: Arc<ParallelBatchOrchestrator>,
    worker: Arc<W>,
}

impl<W: BatchWorker> PipelineDriver<W> {
    pub fn new(
        domain: impl Into<String>,
        watermarks: WatermarkStore,
        selector: EligibilitySelector,
        orchestrator: Arc<ParallelBatchOrchestrator>,
        worker: Arc<W>,
    ) -> Self {
        Self {
            domain: domain.into(),
            watermarks,
            selector,
            orchestrator,
            worker,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn transition(&self, state: &mut DriverState, next: DriverState) {
        debug!(domain = %self.domain, from = %state, to = %next, "Driver state");
        *state = next;
    }

    /// Run the driver once.
    ///
    /// Errors are returned only for conditions that make the run itself
    /// invalid: out-of-order stored watermarks, an inverted explicit range,
    /// or a failed selection read. Sub-batch failures end the run early and
    /// are reported in the summary.
    pub async fn run(
        &self,
        mode: RunMode,
        today: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, CategorizeError> {
        let domain = self.domain.as_str();
        let mut state = DriverState::Idle;
        self.transition(&mut state, DriverState::ComputingWindow);

        self.watermarks.stored(domain).check_order(domain)?;

        let categorized = self.watermarks.get(domain, Stage::Categorized, today);
        let embedded = self.watermarks.get(domain, Stage::Embedded, today);
        let ingested = self.watermarks.get(domain, Stage::Ingested, today);
        let upstream = embedded.min(ingested);
        let window = match mode {
            RunMode::Daily => compute_window(categorized, upstream, today),
            RunMode::Range { from, to } => {
                if from > to {
                    return Err(CategorizeError::InvertedWindow { from, to });
                }
                let end = to.min(today);
                (from <= end).then_some((from, end))
            }
        };

        let mut summary = RunSummary {
            domain: domain.to_string(),
            window,
            days: Vec::new(),
            watermark_before: categorized,
            watermark_after: categorized,
            stopped: None,
        };

        let Some((start, end)) = window else {
            info!(domain = %domain, categorized = %categorized, "Nothing to process");
            self.transition(&mut state, DriverState::Done);
            return Ok(summary);
        };

        info!(domain = %domain, start = %start, end = %end, ?mode, "Processing window");

        let mut cursor = AdvanceCursor::new(categorized, upstream.min(today));
        let mut day = start;
        loop {
            self.transition(&mut state, DriverState::ProcessingDay(day));
            if cancel.is_cancelled() {
                summary.stopped = Some(StopReason::Cancelled(day));
                break;
            }

            let ids = self.selector.select_pending(domain, day)?;
            let outcome = if ids.is_empty() {
                DayOutcome::default()
            } else {
                self.orchestrator
                    .run_day(self.worker.clone(), domain, ids, cancel)
                    .await
            };

            info!(
                domain = %domain,
                day = %day,
                selected = outcome.selected,
                attempted = outcome.attempted,
                updated = outcome.updated,
                skipped = outcome.skipped,
                errors = outcome.errors,
                "Day processed"
            );

            if !outcome.is_complete() {
                summary.stopped = Some(if outcome.cancelled {
                    StopReason::Cancelled(day)
                } else {
                    StopReason::DayFailed(day)
                });
                warn!(domain = %domain, day = %day, "Day incomplete, watermark not advanced");
                summary.days.push(DayReport {
                    day,
                    outcome,
                    advanced: false,
                });
                break;
            }

            self.transition(&mut state, DriverState::AdvancingWatermark(day));
            let advance = cursor.advance(day, |d| {
                self.watermarks.set(domain, Stage::Categorized, d)
            });
            if advance != Advance::Moved {
                debug!(
                    domain = %domain,
                    day = %day,
                    watermark = %cursor.position(),
                    limit = %cursor.limit(),
                    reason = ?advance,
                    "Watermark left unchanged"
                );
            }
            let advanced = advance == Advance::Moved;
            if advanced {
                summary.watermark_after = day;
            }

            summary.days.push(DayReport {
                day,
                outcome,
                advanced,
            });

            if day >= end {
                break;
            }
            day = next_day(day);
        }

        self.transition(&mut state, DriverState::Done);
        Ok(summary)
    }
}

/// Run several domain drivers concurrently.
///
/// Drivers built on the same orchestrator share its worker pool, so the
/// total number of running sub-batches stays bounded. Results come back in
/// the order of `drivers`.
pub async fn run_domains<W: BatchWorker>(
    drivers: &[PipelineDriver<W>],
    mode: RunMode,
    today: NaiveDate,
    cancel: &CancellationToken,
) -> Vec<Result<RunSummary, CategorizeError>> {
    join_all(drivers.iter().map(|d| d.run(mode, today, cancel))).await
}
