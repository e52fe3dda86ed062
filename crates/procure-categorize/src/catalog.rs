//! In-memory category index for nearest-neighbour lookup.
//!
//! The catalog is small compared to the record stream, so an exact
//! brute-force cosine scan is used. It is loaded once per run and shared
//! read-only by all workers.

use std::cmp::Ordering;

use tracing::info;

use procure_storage::Storage;
use procure_types::Category;

use crate::error::CategorizeError;

/// Calculate cosine similarity between two vectors.
///
/// Returns a value in [-1.0, 1.0]; a zero vector scores 0.0 against anything.
/// Callers must pass vectors of equal length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Read-only nearest-category index.
#[derive(Debug)]
pub struct CategoryIndex {
    codes: Vec<String>,
    /// Category vectors, parallel to `codes`
    vectors: Vec<Vec<f32>>,
    dimension: usize,
}

impl CategoryIndex {
    /// Build an index from catalog entries.
    ///
    /// Fails on an empty catalog, mismatched dimensions, or non-finite values.
    pub fn from_categories(categories: Vec<Category>) -> Result<Self, CategorizeError> {
        let dimension = match categories.first() {
            Some(first) => first.embedding.len(),
            None => return Err(CategorizeError::EmptyCatalog),
        };
        if dimension == 0 {
            return Err(CategorizeError::Catalog(
                "category embeddings are empty".to_string(),
            ));
        }

        let mut codes = Vec::with_capacity(categories.len());
        let mut vectors = Vec::with_capacity(categories.len());
        for category in categories {
            if category.embedding.len() != dimension {
                return Err(CategorizeError::Catalog(format!(
                    "category {} has dimension {}, expected {}",
                    category.code,
                    category.embedding.len(),
                    dimension
                )));
            }
            if category.embedding.iter().any(|v| !v.is_finite()) {
                return Err(CategorizeError::Catalog(format!(
                    "category {} has non-finite values",
                    category.code
                )));
            }
            vectors.push(category.embedding);
            codes.push(category.code);
        }

        Ok(Self {
            codes,
            vectors,
            dimension,
        })
    }

    /// Load the full catalog from storage.
    pub fn load(storage: &Storage) -> Result<Self, CategorizeError> {
        let categories = storage.load_categories()?;
        let index = Self::from_categories(categories)?;
        info!(
            categories = index.len(),
            dimension = index.dimension,
            "Loaded category index"
        );
        Ok(index)
    }

    /// Embedding dimension every query must match.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The `k` most similar categories, most similar first.
    ///
    /// Ties are broken by category code so results are deterministic.
    /// Returns fewer than `k` entries when the catalog is smaller.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();

        let cmp = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1)
                .then_with(|| self.codes[a.0].cmp(&self.codes[b.0]))
        };

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, cmp);
            scored.truncate(k);
        }
        scored.sort_by(cmp);

        scored
            .into_iter()
            .map(|(i, sim)| (self.codes[i].clone(), sim))
            .collect()
    }
}
