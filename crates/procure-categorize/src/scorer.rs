//! Similarity scoring and confidence.
//!
//! For each record the scorer fetches its embedding, finds the top-k
//! nearest categories, and derives a confidence from how far the best
//! category stands above the runners-up.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use procure_storage::{decode_vector, Storage};
use procure_types::CategorizationResult;

use crate::catalog::CategoryIndex;
use crate::error::{CategorizeError, SkipReason};

/// Confidence from similarities sorted in descending order.
///
/// With `s1` the top similarity, the weighted gap is
/// `sum over i = 2..n of (s1 - s_i) / (i - 1)`, divided by `s1`, and
/// confidence is `1 - exp(-10 * gap)` rounded to four decimals and clamped
/// to `[0, 1]`. Fewer than two similarities or `s1 == 0` give 0.0.
pub fn confidence(similarities: &[f32]) -> f32 {
    if similarities.len() < 2 {
        return 0.0;
    }
    let s1 = similarities[0] as f64;
    if s1 == 0.0 {
        return 0.0;
    }

    let gap: f64 = similarities[1..]
        .iter()
        .enumerate()
        .map(|(j, &s)| (s1 - s as f64) / (j as f64 + 1.0))
        .sum();
    let weighted_gap = gap / s1;

    let raw = 1.0 - (-10.0 * weighted_gap).exp();
    let rounded = (raw * 10_000.0).round() / 10_000.0;
    if rounded.is_nan() {
        return 0.0;
    }
    rounded.clamp(0.0, 1.0) as f32
}

/// Scored output of one sub-batch.
#[derive(Debug, Default)]
pub struct ScoredBatch {
    /// Results keyed by record ID
    pub results: HashMap<String, CategorizationResult>,
    /// Records left out, with the reason
    pub skipped: Vec<(String, SkipReason)>,
}

/// Scores records against the shared category index.
#[derive(Clone)]
pub struct SimilarityScorer {
    storage: Arc<Storage>,
    index: Arc<CategoryIndex>,
    top_k: usize,
}

impl SimilarityScorer {
    pub fn new(storage: Arc<Storage>, index: Arc<CategoryIndex>, top_k: usize) -> Self {
        Self {
            storage,
            index,
            top_k,
        }
    }

    /// Score a batch of record IDs.
    ///
    /// Records without a usable embedding are skipped, not failed. Only a
    /// storage read error fails the whole batch.
    pub fn score_batch(&self, domain: &str, ids: &[String]) -> Result<ScoredBatch, CategorizeError> {
        let rows = self.storage.get_embeddings(domain, ids)?;

        let mut batch = ScoredBatch::default();
        for (id, row) in ids.iter().zip(rows) {
            let vector = match self.usable_vector(row) {
                Ok(v) => v,
                Err(reason) => {
                    debug!(domain = %domain, id = %id, reason = %reason, "Skipping record");
                    batch.skipped.push((id.clone(), reason));
                    continue;
                }
            };

            let ranked = self.index.nearest(&vector, self.top_k);
            let similarities: Vec<f32> = ranked.iter().map(|(_, s)| *s).collect();
            let conf = confidence(&similarities);
            batch
                .results
                .insert(id.clone(), CategorizationResult::from_ranked(ranked, conf));
        }

        Ok(batch)
    }

    fn usable_vector(&self, row: Option<Vec<u8>>) -> Result<Vec<f32>, SkipReason> {
        let bytes = row.ok_or(SkipReason::MissingEmbedding)?;
        let vector = decode_vector(&bytes).map_err(|e| SkipReason::Malformed(e.to_string()))?;
        if vector.len() != self.index.dimension() {
            return Err(SkipReason::DimensionMismatch {
                expected: self.index.dimension(),
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(SkipReason::NonFinite);
        }
        Ok(vector)
    }
}
