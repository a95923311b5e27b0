//! IVF (inverted file) index: vectors are bucketed by their nearest k-means
//! centroid and a search only scans the `nprobe` closest buckets.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{NeardupError, Result};
use crate::index::io::IndexSnapshotRef;
use crate::index::{
    IndexKind, Neighbor, SearchResults, VectorIndex, check_dimension, check_finite,
    check_search_args, search_each, top_k,
};
use crate::vector::{DistanceMetric, MatrixView};

/// Seed for k-means++ initialization, so training is reproducible.
const KMEANS_SEED: u64 = 1234;
const MAX_ITERATIONS: usize = 25;
const CONVERGENCE_THRESHOLD: f32 = 1e-6;
/// Training sets at least this large assign clusters on the rayon pool.
const PARALLEL_ASSIGN_THRESHOLD: usize = 1000;

/// The coarse quantizer always clusters with squared Euclidean distance.
const QUANTIZER_METRIC: DistanceMetric = DistanceMetric::SquaredEuclidean;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct InvertedList {
    ids: Vec<u64>,
    vectors: Vec<f32>,
}

/// Inverted-file index with exact distances inside each probed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfFlatIndex {
    dimension: usize,
    metric: DistanceMetric,
    nlist: usize,
    nprobe: usize,
    /// `nlist` concatenated centroids; empty until trained.
    centroids: Vec<f32>,
    lists: Vec<InvertedList>,
    ntotal: usize,
}

impl IvfFlatIndex {
    /// Create a new, untrained IVF index with `nlist` cells, probing `nprobe`
    /// of them per query.
    pub fn new(dimension: usize, metric: DistanceMetric, nlist: usize, nprobe: usize) -> Self {
        Self {
            dimension,
            metric,
            nlist,
            nprobe: nprobe.clamp(1, nlist.max(1)),
            centroids: Vec::new(),
            lists: Vec::new(),
            ntotal: 0,
        }
    }

    /// Number of vectors in each cell.
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|list| list.ids.len()).collect()
    }

    fn centroid(&self, i: usize) -> &[f32] {
        &self.centroids[i * self.dimension..(i + 1) * self.dimension]
    }

    fn nearest_centroid(&self, vector: &[f32]) -> usize {
        let mut best_cluster = 0;
        let mut best_distance = f32::INFINITY;

        for i in 0..self.nlist {
            let distance = QUANTIZER_METRIC.distance_unchecked(vector, self.centroid(i));
            if distance < best_distance {
                best_distance = distance;
                best_cluster = i;
            }
        }

        best_cluster
    }

    fn assign(&self, vectors: MatrixView<'_>) -> Vec<usize> {
        if vectors.len() >= PARALLEL_ASSIGN_THRESHOLD {
            vectors
                .as_slice()
                .par_chunks_exact(self.dimension)
                .map(|row| self.nearest_centroid(row))
                .collect()
        } else {
            vectors.iter().map(|row| self.nearest_centroid(row)).collect()
        }
    }

    /// Reject training sets k-means cannot turn into `nlist` distinct cells.
    fn check_training_set(&self, vectors: &MatrixView<'_>) -> Result<()> {
        if vectors.is_empty() {
            return Err(NeardupError::degenerate(
                "cannot train centroids on an empty vector set",
            ));
        }

        if vectors.len() < self.nlist {
            return Err(NeardupError::degenerate(format!(
                "cannot create {} clusters from {} vectors",
                self.nlist,
                vectors.len()
            )));
        }

        let distinct: HashSet<Vec<u32>> = vectors
            .iter()
            .map(|row| row.iter().map(|x| x.to_bits()).collect())
            .collect();
        if distinct.len() < self.nlist {
            return Err(NeardupError::degenerate(format!(
                "cannot create {} clusters from {} distinct vectors",
                self.nlist,
                distinct.len()
            )));
        }

        Ok(())
    }

    /// Pick initial centroids with k-means++.
    fn init_centroids(&mut self, vectors: &MatrixView<'_>) {
        let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
        let n = vectors.len();

        self.centroids.clear();
        self.centroids
            .extend_from_slice(vectors.row(rng.random_range(0..n)));

        let mut min_distances: Vec<f32> = vectors
            .iter()
            .map(|row| QUANTIZER_METRIC.distance_unchecked(row, self.centroid(0)))
            .collect();

        for c in 1..self.nlist {
            let total_weight: f64 = min_distances.iter().map(|&d| d as f64).sum();

            let chosen = if total_weight == 0.0 {
                rng.random_range(0..n)
            } else {
                let target = rng.random::<f64>() * total_weight;
                let mut cumsum = 0.0;
                let mut chosen = None;
                for (i, &weight) in min_distances.iter().enumerate() {
                    cumsum += weight as f64;
                    if weight > 0.0 && cumsum >= target {
                        chosen = Some(i);
                        break;
                    }
                }
                // Rounding may leave target above the final sum.
                chosen.unwrap_or_else(|| {
                    min_distances
                        .iter()
                        .rposition(|&w| w > 0.0)
                        .unwrap_or(n - 1)
                })
            };

            self.centroids.extend_from_slice(vectors.row(chosen));
            let centroid = self.centroid(c).to_vec();
            for (row, best) in vectors.iter().zip(min_distances.iter_mut()) {
                *best = best.min(QUANTIZER_METRIC.distance_unchecked(row, &centroid));
            }
        }
    }

    /// Move each centroid to the mean of its members. Empty cells keep
    /// their previous centroid. Returns the mean centroid movement.
    fn update_centroids(&mut self, vectors: &MatrixView<'_>, assignments: &[usize]) -> f32 {
        let dim = self.dimension;
        let mut sums = vec![0.0f64; self.nlist * dim];
        let mut counts = vec![0usize; self.nlist];

        for (row, &cluster) in vectors.iter().zip(assignments) {
            counts[cluster] += 1;
            for (sum, &value) in sums[cluster * dim..(cluster + 1) * dim].iter_mut().zip(row) {
                *sum += value as f64;
            }
        }

        let mut movement = 0.0;
        for (cluster, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }

            let updated: Vec<f32> = sums[cluster * dim..(cluster + 1) * dim]
                .iter()
                .map(|&s| (s / count as f64) as f32)
                .collect();
            movement += QUANTIZER_METRIC.distance_unchecked(self.centroid(cluster), &updated);
            self.centroids[cluster * dim..(cluster + 1) * dim].copy_from_slice(&updated);
        }

        movement / self.nlist as f32
    }

    fn search_one(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut cells: Vec<Neighbor> = (0..self.nlist)
            .map(|i| {
                Neighbor::new(
                    i as u64,
                    QUANTIZER_METRIC.distance_unchecked(query, self.centroid(i)),
                )
            })
            .collect();
        cells = top_k(cells, self.nprobe);

        let mut candidates = Vec::new();
        for cell in cells {
            let list = &self.lists[cell.id as usize];
            for (&id, row) in list
                .ids
                .iter()
                .zip(list.vectors.chunks_exact(self.dimension))
            {
                candidates.push(Neighbor::new(id, self.metric.distance_unchecked(query, row)));
            }
        }

        top_k(candidates, k)
    }
}

impl VectorIndex for IvfFlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::IvfFlat {
            nlist: self.nlist,
            nprobe: self.nprobe,
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn requires_training(&self) -> bool {
        true
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    fn train(&mut self, vectors: MatrixView<'_>) -> Result<()> {
        check_dimension(self.dimension, &vectors)?;
        check_finite(&vectors)?;

        if self.ntotal > 0 {
            return Err(NeardupError::index(
                "cannot retrain an index that already holds vectors",
            ));
        }

        self.check_training_set(&vectors)?;

        log::debug!(
            "training {} IVF centroids on {} vectors",
            self.nlist,
            vectors.len()
        );

        self.init_centroids(&vectors);

        for iteration in 0..MAX_ITERATIONS {
            let assignments = self.assign(vectors);
            let movement = self.update_centroids(&vectors, &assignments);
            if movement < CONVERGENCE_THRESHOLD {
                log::debug!("k-means converged after {} iterations", iteration + 1);
                break;
            }
        }

        self.lists = vec![InvertedList::default(); self.nlist];
        Ok(())
    }

    fn add(&mut self, vectors: MatrixView<'_>) -> Result<()> {
        if !self.is_trained() {
            return Err(NeardupError::index(
                "IVF index must be trained before adding vectors",
            ));
        }
        check_dimension(self.dimension, &vectors)?;
        check_finite(&vectors)?;

        let assignments = self.assign(vectors);
        for (row, cluster) in vectors.iter().zip(assignments) {
            let list = &mut self.lists[cluster];
            list.ids.push(self.ntotal as u64);
            list.vectors.extend_from_slice(row);
            self.ntotal += 1;
        }

        Ok(())
    }

    fn search(&self, queries: MatrixView<'_>, k: usize) -> Result<SearchResults> {
        check_search_args(self.dimension, &queries, k)?;

        if !self.is_trained() {
            return Ok(vec![Vec::new(); queries.len()]);
        }

        Ok(search_each(queries, |query| self.search_one(query, k)))
    }

    fn reset(&mut self) {
        for list in &mut self.lists {
            list.ids.clear();
            list.vectors.clear();
        }
        self.ntotal = 0;
    }

    fn snapshot(&self) -> IndexSnapshotRef<'_> {
        IndexSnapshotRef::Ivf(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FlatIndex;
    use crate::vector::HashMatrix;

    /// Four well separated groups of five points each.
    fn clustered() -> HashMatrix {
        let centers = [(0.0, 0.0), (10.0, 10.0), (0.0, 10.0), (10.0, 0.0)];
        let mut rows = Vec::new();
        for (cx, cy) in centers {
            for i in 0..5 {
                rows.push(vec![cx + i as f32 * 0.1, cy + i as f32 * 0.1]);
            }
        }
        HashMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn test_ivf_requires_training() {
        let data = clustered();
        let mut index = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 4, 1);
        assert!(index.requires_training());
        assert!(!index.is_trained());
        assert!(matches!(
            index.add(data.view()),
            Err(NeardupError::Index(_))
        ));
    }

    #[test]
    fn test_ivf_train_add_search() {
        let data = clustered();
        let mut index = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 4, 1);
        index.train(data.view()).unwrap();
        index.add(data.view()).unwrap();

        assert_eq!(index.ntotal(), 20);
        let mut sizes = index.list_sizes();
        sizes.sort();
        assert_eq!(sizes, vec![5, 5, 5, 5]);

        let queries = HashMatrix::from_rows(vec![vec![10.2, 10.2]]).unwrap();
        let results = index.search(queries.view(), 1).unwrap();
        assert_eq!(results[0][0].id, 7);
        assert!(results[0][0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_ivf_full_probe_matches_flat() {
        let data = clustered();
        let mut ivf = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 4, 4);
        ivf.train(data.view()).unwrap();
        ivf.add(data.view()).unwrap();

        let mut flat = FlatIndex::new(2, DistanceMetric::SquaredEuclidean);
        flat.add(data.view()).unwrap();

        let queries = HashMatrix::from_rows(vec![vec![5.0, 5.0], vec![0.3, 9.0]]).unwrap();
        assert_eq!(
            ivf.search(queries.view(), 6).unwrap(),
            flat.search(queries.view(), 6).unwrap()
        );
    }

    #[test]
    fn test_ivf_degenerate_training_sets() {
        let mut index = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 4, 1);

        let empty = HashMatrix::new(2);
        assert!(index.train(empty.view()).unwrap_err().is_degenerate_training());

        let too_few = HashMatrix::from_rows(vec![vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        assert!(index.train(too_few.view()).unwrap_err().is_degenerate_training());

        let identical = HashMatrix::from_rows(vec![vec![1.0, 1.0]; 10]).unwrap();
        assert!(index.train(identical.view()).unwrap_err().is_degenerate_training());
        assert!(!index.is_trained());
    }

    #[test]
    fn test_ivf_single_cell_accepts_identical_vectors() {
        let identical = HashMatrix::from_rows(vec![vec![1.0, 1.0]; 3]).unwrap();
        let mut index = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 1, 1);
        index.train(identical.view()).unwrap();
        index.add(identical.view()).unwrap();

        let results = index.search(identical.slice(0..1), 5).unwrap();
        let ids: Vec<u64> = results[0].iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_ivf_reset_keeps_training() {
        let data = clustered();
        let mut index = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 4, 2);
        index.train(data.view()).unwrap();
        index.add(data.view()).unwrap();

        index.reset();
        index.reset();
        assert_eq!(index.ntotal(), 0);
        assert!(index.is_trained());

        index.add(data.slice(0..3)).unwrap();
        assert_eq!(index.ntotal(), 3);
    }

    #[test]
    fn test_ivf_training_is_deterministic() {
        let data = clustered();
        let mut a = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 4, 1);
        let mut b = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 4, 1);
        a.train(data.view()).unwrap();
        b.train(data.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ivf_refuses_retrain_when_populated() {
        let data = clustered();
        let mut index = IvfFlatIndex::new(2, DistanceMetric::SquaredEuclidean, 4, 1);
        index.train(data.view()).unwrap();
        index.add(data.view()).unwrap();
        assert!(matches!(
            index.train(data.view()),
            Err(NeardupError::Index(_))
        ));
    }
}
