//! Configuration for the matching engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NeardupError, Result};
use crate::index::IndexKind;
use crate::vector::DistanceMetric;

/// Name of the persisted index in the unbatched and combined modes.
pub const COMBINED_INDEX_NAME: &str = "vector.index";

/// How the engine builds and searches indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// One index over the whole corpus.
    Unbatched,
    /// Batches added one after another into one index, searched once.
    BatchedCombined,
    /// A fresh index per batch, each searched on its own.
    BatchedSeparate,
}

impl SearchMode {
    /// Name of the persisted index for `batch` in this mode.
    pub fn index_file_name(&self, batch: usize) -> String {
        match self {
            SearchMode::BatchedSeparate => format!("vector_{batch}.index"),
            _ => COMBINED_INDEX_NAME.to_string(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Index topology, e.g. `"Flat"` or `"IVF64,Flat"`.
    pub index_method: String,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Split the reference corpus into batches.
    pub batching_enabled: bool,
    /// Write each built index to storage.
    pub persist_indexes: bool,
    /// With batching on, search every batch with its own index.
    pub separate_batch_search: bool,
    /// Reference vectors per batch.
    pub batch_size: usize,
    /// Matches need a normalized distance strictly below this value.
    pub similarity_threshold: f32,
    /// Neighbors requested per query.
    pub k_neighbors: usize,
    /// Rebuild as a flat index when training data is degenerate.
    pub fallback_to_flat: bool,
    /// Worker threads for per-batch search; `None` uses every CPU.
    pub parallelism: Option<usize>,
    /// Abort work not yet started once this much time has passed.
    pub time_budget: Option<Duration>,
    /// Directory for persisted indexes when no storage is supplied.
    pub index_directory: PathBuf,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            index_method: "Flat".to_string(),
            metric: DistanceMetric::SquaredEuclidean,
            batching_enabled: true,
            persist_indexes: true,
            separate_batch_search: true,
            batch_size: 5000,
            similarity_threshold: 0.40,
            k_neighbors: 10,
            fallback_to_flat: false,
            parallelism: None,
            time_budget: None,
            index_directory: PathBuf::from("."),
        }
    }
}

impl MatchConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    ///
    /// The metric accepts every name [`DistanceMetric::parse_str`] does, and an
    /// unknown one is reported as an unsupported index configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if let Some(metric) = value.get("metric").and_then(serde_json::Value::as_str) {
            DistanceMetric::parse_str(metric)?;
        }

        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Check every option before any index work starts.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(NeardupError::invalid_config("batch size must be positive"));
        }

        if self.k_neighbors == 0 {
            return Err(NeardupError::invalid_config(
                "number of neighbors must be positive",
            ));
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(NeardupError::invalid_config(format!(
                "similarity threshold {} is outside [0, 1]",
                self.similarity_threshold
            )));
        }

        if self.parallelism == Some(0) {
            return Err(NeardupError::invalid_config(
                "parallelism must be at least one thread",
            ));
        }

        self.index_kind()?;
        Ok(())
    }

    /// The parsed index topology.
    pub fn index_kind(&self) -> Result<IndexKind> {
        IndexKind::parse_str(&self.index_method)
    }

    /// The operating mode these flags select.
    pub fn mode(&self) -> SearchMode {
        match (self.batching_enabled, self.separate_batch_search) {
            (false, _) => SearchMode::Unbatched,
            (true, false) => SearchMode::BatchedCombined,
            (true, true) => SearchMode::BatchedSeparate,
        }
    }

    /// Worker threads to use for per-batch search.
    pub fn worker_threads(&self) -> usize {
        self.parallelism.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MatchConfig::default();
        assert_eq!(config.batch_size, 5000);
        assert_eq!(config.similarity_threshold, 0.40);
        assert_eq!(config.k_neighbors, 10);
        assert_eq!(config.mode(), SearchMode::BatchedSeparate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_selection() {
        let mut config = MatchConfig {
            batching_enabled: false,
            ..MatchConfig::default()
        };
        assert_eq!(config.mode(), SearchMode::Unbatched);

        config.batching_enabled = true;
        config.separate_batch_search = false;
        assert_eq!(config.mode(), SearchMode::BatchedCombined);
    }

    #[test]
    fn test_validation_failures() {
        let invalid = [
            MatchConfig {
                batch_size: 0,
                ..MatchConfig::default()
            },
            MatchConfig {
                k_neighbors: 0,
                ..MatchConfig::default()
            },
            MatchConfig {
                similarity_threshold: 1.5,
                ..MatchConfig::default()
            },
            MatchConfig {
                similarity_threshold: f32::NAN,
                ..MatchConfig::default()
            },
            MatchConfig {
                parallelism: Some(0),
                ..MatchConfig::default()
            },
        ];

        for config in invalid {
            assert!(matches!(
                config.validate(),
                Err(NeardupError::InvalidConfiguration(_))
            ));
        }

        let unsupported = MatchConfig {
            index_method: "HNSW32".to_string(),
            ..MatchConfig::default()
        };
        assert!(matches!(
            unsupported.validate(),
            Err(NeardupError::UnsupportedIndexConfiguration(_))
        ));
    }

    #[test]
    fn test_from_json() {
        let config = MatchConfig::from_json_str(
            r#"{"index_method": "IVF8,Flat", "metric": "manhattan", "batch_size": 100}"#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.metric, DistanceMetric::Manhattan);
        assert_eq!(
            config.index_kind().unwrap(),
            IndexKind::IvfFlat {
                nlist: 8,
                nprobe: 1
            }
        );
        assert_eq!(config.k_neighbors, 10);

        assert!(MatchConfig::from_json_str(r#"{"batch_size": 0}"#).is_err());
    }

    #[test]
    fn test_from_json_metric_names() {
        let config = MatchConfig::from_json_str(r#"{"metric": "l2"}"#).unwrap();
        assert_eq!(config.metric, DistanceMetric::SquaredEuclidean);

        let config = MatchConfig::from_json_str(r#"{"metric": "METRIC_L1"}"#).unwrap();
        assert_eq!(config.metric, DistanceMetric::Manhattan);

        assert!(matches!(
            MatchConfig::from_json_str(r#"{"metric": "hamming"}"#),
            Err(NeardupError::UnsupportedIndexConfiguration(_))
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_metric() {
        let config = MatchConfig {
            metric: DistanceMetric::Cosine,
            ..MatchConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""metric":"cosine""#));
        assert_eq!(MatchConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("neardup.json");
        std::fs::write(&path, r#"{"k_neighbors": 1, "batching_enabled": false}"#).unwrap();

        let config = MatchConfig::from_json_file(&path).unwrap();
        assert_eq!(config.k_neighbors, 1);
        assert_eq!(config.mode(), SearchMode::Unbatched);
    }

    #[test]
    fn test_index_file_names() {
        assert_eq!(SearchMode::Unbatched.index_file_name(0), "vector.index");
        assert_eq!(SearchMode::BatchedCombined.index_file_name(4), "vector.index");
        assert_eq!(SearchMode::BatchedSeparate.index_file_name(4), "vector_4.index");
    }

    #[test]
    fn test_worker_threads() {
        let config = MatchConfig {
            parallelism: Some(3),
            ..MatchConfig::default()
        };
        assert_eq!(config.worker_threads(), 3);
        assert!(MatchConfig::default().worker_threads() >= 1);
    }
}
