//! Eligibility selection for one day.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use procure_storage::Storage;
use procure_types::day_bounds_ms;

use crate::error::CategorizeError;

/// Finds records whose effective timestamp falls in a day, that have an
/// embedding and no categorization result.
///
/// Selection is read-only. Only IDs come back; embeddings are fetched
/// later by the workers that score them.
#[derive(Clone)]
pub struct EligibilitySelector {
    storage: Arc<Storage>,
}

impl EligibilitySelector {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Pending record IDs for `day` in `[00:00, next day 00:00)` UTC.
    pub fn select_pending(&self, domain: &str, day: NaiveDate) -> Result<Vec<String>, CategorizeError> {
        let (start_ms, end_ms) = day_bounds_ms(day);
        let ids = self.storage.pending_ids(domain, start_ms, end_ms)?;
        debug!(domain = %domain, day = %day, count = ids.len(), "Selected pending records");
        Ok(ids)
    }
}
