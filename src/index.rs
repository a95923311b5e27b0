//! Vector indexes over hash vectors.
//!
//! An index follows a fixed lifecycle: created by [`factory::IndexFactory`],
//! trained once on a designated training set, populated with [`VectorIndex::add`],
//! searched any number of times, optionally written to storage, then reset or
//! dropped. Vectors receive ascending local ids in the order they are added.
//!
//! Two topologies are provided:
//!
//! - [`flat::FlatIndex`]: exhaustive scan, needs no training
//! - [`ivf::IvfFlatIndex`]: inverted file over k-means cells, must be trained

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{NeardupError, Result};
use crate::storage::Storage;
use crate::vector::{DistanceMetric, MatrixView};

pub mod factory;
pub mod flat;
pub mod io;
pub mod ivf;

pub use factory::{IndexFactory, IndexKind};
pub use flat::FlatIndex;
pub use ivf::IvfFlatIndex;

/// Query batches at least this large are searched on the rayon pool.
const PARALLEL_QUERY_THRESHOLD: usize = 64;

/// One nearest-neighbor hit: a local id and its raw metric distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Position of the vector in the order it was added to the index.
    pub id: u64,
    /// Raw (un-normalized) distance to the query.
    pub distance: f32,
}

impl Neighbor {
    pub fn new(id: u64, distance: f32) -> Self {
        Self { id, distance }
    }
}

/// Neighbors of each query, in query order. Each inner list is sorted by
/// ascending distance, ties broken by ascending id, and holds at most `k`
/// entries; fewer when the index holds fewer vectors.
pub type SearchResults = Vec<Vec<Neighbor>>;

/// Trait implemented by every index topology.
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    /// Topology of this index.
    fn kind(&self) -> IndexKind;

    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Distance metric used for search.
    fn metric(&self) -> DistanceMetric;

    /// Whether `train` must be called before `add`.
    fn requires_training(&self) -> bool;

    /// Whether the index is ready to accept vectors.
    fn is_trained(&self) -> bool;

    /// Number of vectors currently held.
    fn ntotal(&self) -> usize;

    /// Calibrate internal structures on `vectors`.
    fn train(&mut self, vectors: MatrixView<'_>) -> Result<()>;

    /// Append `vectors`, assigning local ids `ntotal()..ntotal() + vectors.len()`.
    fn add(&mut self, vectors: MatrixView<'_>) -> Result<()>;

    /// Find up to `k` nearest neighbors of every query.
    fn search(&self, queries: MatrixView<'_>, k: usize) -> Result<SearchResults>;

    /// Drop all added vectors, keeping training. Idempotent.
    fn reset(&mut self);

    /// Borrowed serializable form used by [`io::write_index`].
    fn snapshot(&self) -> io::IndexSnapshotRef<'_>;
}

impl dyn VectorIndex + '_ {
    /// Persist this index to `storage` under `name`.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        io::write_index(self, storage, name)
    }

    /// Restore an index previously written under `name`.
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Box<dyn VectorIndex>> {
        io::read_index(storage, name)
    }
}

/// Order neighbors by distance, then by id.
pub(crate) fn cmp_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

/// Keep the `k` best neighbors, sorted.
pub(crate) fn top_k(mut candidates: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k, cmp_neighbors);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(cmp_neighbors);
    candidates
}

/// Validate a query batch against an index before searching.
pub(crate) fn check_search_args(dimension: usize, queries: &MatrixView<'_>, k: usize) -> Result<()> {
    if k == 0 {
        return Err(NeardupError::invalid_config(
            "number of neighbors must be positive",
        ));
    }
    check_dimension(dimension, queries)
}

/// Validate that a batch of vectors matches the index dimension.
pub(crate) fn check_dimension(dimension: usize, vectors: &MatrixView<'_>) -> Result<()> {
    if !vectors.is_empty() && vectors.dimension() != dimension {
        return Err(NeardupError::dimension_mismatch(
            dimension,
            vectors.dimension(),
        ));
    }
    Ok(())
}

/// Reject NaN and infinite values.
pub(crate) fn check_finite(vectors: &MatrixView<'_>) -> Result<()> {
    if let Some(row) = vectors
        .iter()
        .position(|row| row.iter().any(|x| !x.is_finite()))
    {
        return Err(NeardupError::invalid_config(format!(
            "vector {row} contains invalid values (NaN or infinity)"
        )));
    }
    Ok(())
}

/// Run `search_one` for every query, on the rayon pool for large batches.
pub(crate) fn search_each<F>(queries: MatrixView<'_>, search_one: F) -> SearchResults
where
    F: Fn(&[f32]) -> Vec<Neighbor> + Sync + Send,
{
    if queries.len() >= PARALLEL_QUERY_THRESHOLD {
        queries
            .as_slice()
            .par_chunks_exact(queries.dimension())
            .map(&search_one)
            .collect()
    } else {
        queries.iter().map(search_one).collect()
    }
}
