//! Watermark store.
//!
//! Reads and writes per-domain, per-stage progress dates. Reads never fail:
//! a missing or unreadable row falls back to the stage default so the
//! driver can always compute a window. Writes report success as a bool;
//! a failed write leaves the stored watermark where it was and the same
//! day is reprocessed on the next run.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use procure_storage::Storage;
use procure_types::{Stage, WatermarkRow};

use crate::error::CategorizeError;

/// The three watermarks of one domain as they are stored.
///
/// `None` means no row exists; defaults are applied only when a window is
/// computed, never when checking stored rows against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoredWatermarks {
    pub ingested: Option<NaiveDate>,
    pub embedded: Option<NaiveDate>,
    pub categorized: Option<NaiveDate>,
}

impl StoredWatermarks {
    /// Check `categorized <= embedded <= ingested` over the rows present.
    pub fn check_order(&self, domain: &str) -> Result<(), CategorizeError> {
        let pairs = [
            (Stage::Categorized, self.categorized, Stage::Embedded, self.embedded),
            (Stage::Embedded, self.embedded, Stage::Ingested, self.ingested),
            (Stage::Categorized, self.categorized, Stage::Ingested, self.ingested),
        ];
        for (lower_stage, lower, upper_stage, upper) in pairs {
            if let (Some(lower), Some(upper)) = (lower, upper) {
                if lower > upper {
                    return Err(CategorizeError::InvariantViolation {
                        domain: domain.to_string(),
                        detail: format!(
                            "{} watermark {} is ahead of {} watermark {}",
                            lower_stage, lower, upper_stage, upper
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Durable per-domain progress markers.
#[derive(Clone)]
pub struct WatermarkStore {
    storage: Arc<Storage>,
    floor: NaiveDate,
}

impl WatermarkStore {
    /// Create a store. `floor` is the categorized watermark assumed when
    /// none has been written yet.
    pub fn new(storage: Arc<Storage>, floor: NaiveDate) -> Self {
        Self { storage, floor }
    }

    /// Configured floor date.
    pub fn floor(&self) -> NaiveDate {
        self.floor
    }

    /// Default used when a stage has no readable row.
    ///
    /// Upstream stages default to `today` so a missing upstream never holds
    /// categorization back; the categorized stage defaults to the floor so
    /// a fresh domain starts from the beginning.
    pub fn default_for(&self, stage: Stage, today: NaiveDate) -> NaiveDate {
        match stage {
            Stage::Categorized => self.floor,
            Stage::Embedded | Stage::Ingested => today,
        }
    }

    /// Read a watermark, falling back to the stage default.
    pub fn get(&self, domain: &str, stage: Stage, today: NaiveDate) -> NaiveDate {
        self.get_or(domain, stage, self.default_for(stage, today))
    }

    /// Read a watermark, falling back to `default`.
    pub fn get_or(&self, domain: &str, stage: Stage, default: NaiveDate) -> NaiveDate {
        match self.storage.get_watermark(domain, stage) {
            Ok(Some(row)) => row.date,
            Ok(None) => {
                debug!(domain = %domain, stage = %stage, default = %default, "No watermark, using default");
                default
            }
            Err(e) => {
                warn!(
                    domain = %domain,
                    stage = %stage,
                    default = %default,
                    error = %e,
                    "Failed to read watermark, using default"
                );
                default
            }
        }
    }

    /// Read a watermark without applying defaults.
    pub fn try_get(&self, domain: &str, stage: Stage) -> Result<Option<NaiveDate>, CategorizeError> {
        Ok(self
            .storage
            .get_watermark(domain, stage)?
            .map(|row| row.date))
    }

    /// Read all three stored watermarks of a domain.
    ///
    /// An unreadable row is reported as absent, matching [`Self::get`].
    pub fn stored(&self, domain: &str) -> StoredWatermarks {
        let read = |stage| match self.try_get(domain, stage) {
            Ok(date) => date,
            Err(e) => {
                warn!(domain = %domain, stage = %stage, error = %e, "Failed to read watermark");
                None
            }
        };
        StoredWatermarks {
            ingested: read(Stage::Ingested),
            embedded: read(Stage::Embedded),
            categorized: read(Stage::Categorized),
        }
    }

    /// Upsert a watermark. Returns false if the write failed.
    pub fn set(&self, domain: &str, stage: Stage, date: NaiveDate) -> bool {
        let row = WatermarkRow::new(domain, stage, date);
        match self.storage.put_watermark(&row) {
            Ok(()) => {
                info!(domain = %domain, stage = %stage, date = %date, "Advanced watermark");
                true
            }
            Err(e) => {
                warn!(
                    domain = %domain,
                    stage = %stage,
                    date = %date,
                    error = %e,
                    "Failed to write watermark"
                );
                false
            }
        }
    }
}
