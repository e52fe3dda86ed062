//! Write-once application of scored results.

use std::sync::Arc;

use tracing::debug;

use procure_storage::Storage;

use crate::error::CategorizeError;
use crate::scorer::ScoredBatch;

/// Persists categorization results only where none exist yet.
///
/// Concurrent or repeated application of the same record never overwrites
/// an existing result, so replaying a day is harmless.
#[derive(Clone)]
pub struct BatchApplier {
    storage: Arc<Storage>,
}

impl BatchApplier {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Apply a scored batch. Returns the number of rows actually changed.
    pub fn apply(&self, domain: &str, batch: &ScoredBatch) -> Result<usize, CategorizeError> {
        let mut updated = 0;
        for (id, result) in &batch.results {
            if self.storage.apply_result_if_unset(domain, id, result)? {
                updated += 1;
            }
        }
        debug!(
            domain = %domain,
            scored = batch.results.len(),
            updated = updated,
            "Applied scored batch"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procure_types::CategorizationResult;
    use tempfile::TempDir;

    fn batch_of(ids: &[&str], code: &str) -> ScoredBatch {
        let mut batch = ScoredBatch::default();
        for id in ids {
            batch.results.insert(
                id.to_string(),
                CategorizationResult::from_ranked(vec![(code.to_string(), 0.8)], 0.5),
            );
        }
        batch
    }

    #[test]
    fn test_apply_is_write_once() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let applier = BatchApplier::new(storage.clone());

        let first = applier.apply("tenders", &batch_of(&["T-1", "T-2"], "45000000")).unwrap();
        assert_eq!(first, 2);

        let second = applier
            .apply("tenders", &batch_of(&["T-1", "T-2", "T-3"], "33000000"))
            .unwrap();
        assert_eq!(second, 1);

        let kept = storage.get_result("tenders", "T-1").unwrap().unwrap();
        assert_eq!(kept.best(), Some("45000000"));
        let fresh = storage.get_result("tenders", "T-3").unwrap().unwrap();
        assert_eq!(fresh.best(), Some("33000000"));
    }

    #[test]
    fn test_apply_empty_batch() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let applier = BatchApplier::new(storage);
        assert_eq!(applier.apply("tenders", &ScoredBatch::default()).unwrap(), 0);
    }
}
