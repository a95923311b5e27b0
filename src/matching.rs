//! Turning raw kNN output into named, thresholded matches.
//!
//! For every neighbor returned by an index the aggregator divides the raw
//! distance by the vector dimension, keeps it only when the result is
//! strictly below the similarity threshold, shifts the local id by the batch
//! offset and resolves the reference image it points to.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::batch::Batch;
use crate::engine::config::SearchMode;
use crate::error::{NeardupError, Result};
use crate::index::{Neighbor, SearchResults};
use crate::vector::{ImageSet, image_stem};

/// A reference image accepted as a near-duplicate of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMatch {
    /// Reference image name without extension.
    pub name: String,
    /// Raw distance divided by the vector dimension.
    pub distance: f32,
}

/// A batch whose index could not be built or searched.
#[derive(Debug)]
pub struct BatchFailure {
    pub batch: usize,
    pub error: NeardupError,
}

/// Result of a matching run.
#[derive(Debug)]
pub struct MatchReport {
    /// Mode the engine ran in.
    pub mode: SearchMode,
    /// Matches per query key, each list in neighbor-rank order.
    pub entries: HashMap<String, Vec<ImageMatch>>,
    /// Batches skipped because of an error.
    pub failed_batches: Vec<BatchFailure>,
    /// Names of indexes that could not be persisted.
    pub persistence_failures: Vec<String>,
}

impl MatchReport {
    pub fn new(mode: SearchMode) -> Self {
        Self {
            mode,
            entries: HashMap::new(),
            failed_batches: Vec::new(),
            persistence_failures: Vec::new(),
        }
    }

    /// Matches recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&[ImageMatch]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Total number of accepted matches across all keys.
    pub fn match_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether every batch ran and every index was persisted.
    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty() && self.persistence_failures.is_empty()
    }

    pub(crate) fn extend(&mut self, entries: Vec<(String, Vec<ImageMatch>)>) {
        self.entries.extend(entries);
    }

    /// Legacy export: each key maps to a flat array alternating matched name
    /// and normalized distance.
    pub fn to_flat_json(&self) -> Value {
        let mut object = Map::new();
        for key in self.sorted_keys() {
            let flat: Vec<Value> = self.entries[key]
                .iter()
                .flat_map(|m| [json!(m.name), json!(m.distance)])
                .collect();
            object.insert(key.to_string(), Value::Array(flat));
        }
        Value::Object(object)
    }
}

/// Key under which a query's matches are recorded; batch-qualified in the
/// separate-batch mode so batches never collide.
pub fn entry_key(query_name: &str, batch: Option<usize>) -> String {
    let stem = image_stem(query_name);
    match batch {
        Some(number) => format!("{stem}_batch_{number}"),
        None => stem.to_string(),
    }
}

/// Normalizes, thresholds and remaps raw neighbors.
#[derive(Debug, Clone, Copy)]
pub struct MatchAggregator<'a> {
    references: &'a ImageSet,
    dimension: usize,
    threshold: f32,
}

impl<'a> MatchAggregator<'a> {
    pub fn new(references: &'a ImageSet, dimension: usize, threshold: f32) -> Self {
        Self {
            references,
            dimension,
            threshold,
        }
    }

    /// Raw distance divided by the vector dimension.
    pub fn normalize(&self, raw_distance: f32) -> f32 {
        raw_distance / self.dimension as f32
    }

    /// Whether a normalized distance passes the threshold (strictly below).
    pub fn accepts(&self, normalized: f32) -> bool {
        normalized < self.threshold
    }

    /// Accepted matches among one query's neighbors, in rank order.
    pub fn collect(&self, neighbors: &[Neighbor], batch_offset: usize) -> Result<Vec<ImageMatch>> {
        let mut matches = Vec::new();
        for neighbor in neighbors {
            let distance = self.normalize(neighbor.distance);
            if !self.accepts(distance) {
                continue;
            }

            let global_id = neighbor.id as usize + batch_offset;
            let name = self.references.stem(global_id).ok_or_else(|| {
                NeardupError::index(format!(
                    "neighbor id {global_id} is outside the {} reference images",
                    self.references.len()
                ))
            })?;

            matches.push(ImageMatch {
                name: name.to_string(),
                distance,
            });
        }
        Ok(matches)
    }

    /// One entry per query, in query order. `batch` is set in the
    /// separate-batch mode: it supplies the id offset and qualifies the key.
    pub fn aggregate(
        &self,
        queries: &ImageSet,
        results: &SearchResults,
        batch: Option<&Batch>,
    ) -> Result<Vec<(String, Vec<ImageMatch>)>> {
        let offset = batch.map(Batch::offset).unwrap_or(0);
        let number = batch.map(|b| b.number);

        queries
            .names()
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let neighbors = results.get(position).map(Vec::as_slice).unwrap_or(&[]);
                Ok((entry_key(name, number), self.collect(neighbors, offset)?))
            })
            .collect()
    }
}
