//! Flat index for exact (exhaustive) search.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::io::IndexSnapshotRef;
use crate::index::{
    IndexKind, Neighbor, SearchResults, VectorIndex, check_dimension, check_finite,
    check_search_args, search_each, top_k,
};
use crate::vector::{DistanceMetric, MatrixView};

/// Exhaustive index: every query is compared against every stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    metric: DistanceMetric,
    /// Concatenated rows of length `dimension`; row `i` has local id `i`.
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Create a new, empty flat index.
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            vectors: Vec::new(),
        }
    }

    fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.vectors.chunks_exact(self.dimension.max(1))
    }

    fn search_one(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let candidates = self
            .rows()
            .enumerate()
            .map(|(id, row)| Neighbor::new(id as u64, self.metric.distance_unchecked(query, row)))
            .collect();
        top_k(candidates, k)
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn requires_training(&self) -> bool {
        false
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn ntotal(&self) -> usize {
        self.vectors.len().checked_div(self.dimension).unwrap_or(0)
    }

    fn train(&mut self, vectors: MatrixView<'_>) -> Result<()> {
        check_dimension(self.dimension, &vectors)
    }

    fn add(&mut self, vectors: MatrixView<'_>) -> Result<()> {
        check_dimension(self.dimension, &vectors)?;
        check_finite(&vectors)?;
        self.vectors.extend_from_slice(vectors.as_slice());
        Ok(())
    }

    fn search(&self, queries: MatrixView<'_>, k: usize) -> Result<SearchResults> {
        check_search_args(self.dimension, &queries, k)?;
        Ok(search_each(queries, |query| self.search_one(query, k)))
    }

    fn reset(&mut self) {
        self.vectors.clear();
    }

    fn snapshot(&self) -> IndexSnapshotRef<'_> {
        IndexSnapshotRef::Flat(self)
    }
}
