//! Distance metrics for hash-vector comparison.

use serde::{Deserialize, Serialize};
use wide::f32x8;

use crate::error::{NeardupError, Result};

/// Distance metrics for vector comparison. Smaller is always closer.
///
/// Serialized by name; deserialization accepts every alias of [`parse_str`].
///
/// [`parse_str`]: DistanceMetric::parse_str
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum DistanceMetric {
    /// Squared Euclidean distance (sum of squared differences, no root).
    #[default]
    SquaredEuclidean,
    /// Euclidean (L2) distance
    Euclidean,
    /// Manhattan (L1) distance
    Manhattan,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
}

impl DistanceMetric {
    /// Calculate the distance between two vectors using this metric.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(NeardupError::dimension_mismatch(a.len(), b.len()));
        }

        Ok(self.distance_unchecked(a, b))
    }

    /// Distance between two vectors already known to share a dimension.
    pub(crate) fn distance_unchecked(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::SquaredEuclidean => squared_l2(a, b),
            DistanceMetric::Euclidean => squared_l2(a, b).sqrt(),
            DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum(),
            DistanceMetric::Cosine => {
                let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0 // Maximum distance for zero vectors
                } else {
                    1.0 - (dot_product / (norm_a * norm_b))
                }
            }
        }
    }

    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::SquaredEuclidean => "squared_euclidean",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Cosine => "cosine",
        }
    }

    /// Parse a distance metric from a string.
    ///
    /// `l2` means squared Euclidean, the convention of common vector-search
    /// libraries.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "squared_euclidean" | "l2" | "metric_l2" => Ok(DistanceMetric::SquaredEuclidean),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "manhattan" | "l1" | "metric_l1" => Ok(DistanceMetric::Manhattan),
            "cosine" => Ok(DistanceMetric::Cosine),
            _ => Err(NeardupError::unsupported(format!(
                "Unknown distance metric: {s}"
            ))),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for DistanceMetric {
    type Error = NeardupError;

    fn try_from(name: String) -> Result<Self> {
        Self::parse_str(&name)
    }
}

impl From<DistanceMetric> for String {
    fn from(metric: DistanceMetric) -> Self {
        metric.name().to_string()
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = NeardupError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

/// Sum of squared differences, eight lanes at a time.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();

    let mut acc = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        let mut lanes_a = [0.0f32; 8];
        let mut lanes_b = [0.0f32; 8];
        lanes_a.copy_from_slice(ca);
        lanes_b.copy_from_slice(cb);
        let diff = f32x8::from(lanes_a) - f32x8::from(lanes_b);
        acc += diff * diff;
    }

    acc.reduce_add() + tail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squared_euclidean_matches_scalar() {
        let a: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..19).map(|i| (i % 3) as f32).collect();
        let scalar: f32 = a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum();

        let simd = DistanceMetric::SquaredEuclidean.distance(&a, &b).unwrap();
        assert!((simd - scalar).abs() < 1e-3);
    }

    #[test]
    fn test_binary_hash_distance_counts_differing_bits() {
        let a = vec![1.0f32; 64];
        let mut b = a.clone();
        for bit in b.iter_mut().take(4) {
            *bit = 0.0;
        }

        assert_eq!(DistanceMetric::SquaredEuclidean.distance(&a, &b).unwrap(), 4.0);
        assert_eq!(DistanceMetric::Euclidean.distance(&a, &b).unwrap(), 2.0);
        assert_eq!(DistanceMetric::Manhattan.distance(&a, &b).unwrap(), 4.0);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let zero = vec![0.0f32; 4];
        let one = vec![1.0f32; 4];
        assert_eq!(DistanceMetric::Cosine.distance(&zero, &one).unwrap(), 1.0);
        assert!(DistanceMetric::Cosine.distance(&one, &one).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = DistanceMetric::SquaredEuclidean
            .distance(&[1.0, 2.0], &[1.0])
            .unwrap_err();
        assert!(matches!(
            err,
            NeardupError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_parse_str() {
        assert_eq!(
            DistanceMetric::parse_str("L2").unwrap(),
            DistanceMetric::SquaredEuclidean
        );
        assert_eq!(
            "manhattan".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Manhattan
        );
        assert!(matches!(
            DistanceMetric::parse_str("hamming"),
            Err(NeardupError::UnsupportedIndexConfiguration(_))
        ));
    }

    #[test]
    fn test_serde_uses_metric_names() {
        let json = serde_json::to_string(&DistanceMetric::Manhattan).unwrap();
        assert_eq!(json, r#""manhattan""#);

        let metric: DistanceMetric = serde_json::from_str(r#""L2""#).unwrap();
        assert_eq!(metric, DistanceMetric::SquaredEuclidean);
        let metric: DistanceMetric = serde_json::from_str(r#""l1""#).unwrap();
        assert_eq!(metric, DistanceMetric::Manhattan);

        assert!(serde_json::from_str::<DistanceMetric>(r#""hamming""#).is_err());
    }
}
