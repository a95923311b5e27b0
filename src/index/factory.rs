//! Construction of indexes from topology descriptions.
//!
//! Topologies are named with the compact strings used by common vector-search
//! libraries:
//!
//! - `"Flat"`: exhaustive search
//! - `"IVF<nlist>,Flat"`: inverted file with `nlist` cells, probing one cell
//! - `"IVF<nlist>_<nprobe>,Flat"`: same, probing `nprobe` cells

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NeardupError, Result};
use crate::index::{FlatIndex, IvfFlatIndex, VectorIndex};
use crate::vector::DistanceMetric;

static IVF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^IVF(\d+)(?:_(\d+))?,\s*Flat$").expect("valid IVF pattern")
});

/// Index topologies that can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Exhaustive scan, no training.
    Flat,
    /// Inverted file over k-means cells.
    IvfFlat { nlist: usize, nprobe: usize },
}

impl IndexKind {
    /// Parse a topology description such as `"Flat"` or `"IVF16,Flat"`.
    pub fn parse_str(method: &str) -> Result<Self> {
        let method = method.trim();
        if method.eq_ignore_ascii_case("flat") {
            return Ok(IndexKind::Flat);
        }

        let captures = IVF_PATTERN
            .captures(method)
            .ok_or_else(|| NeardupError::unsupported(format!("Unknown index method: {method}")))?;

        let nlist = parse_count(&captures[1], method)?;
        let nprobe = match captures.get(2) {
            Some(m) => parse_count(m.as_str(), method)?,
            None => 1,
        };

        if nlist == 0 || nprobe == 0 {
            return Err(NeardupError::unsupported(format!(
                "Index method needs at least one cell and one probe: {method}"
            )));
        }

        Ok(IndexKind::IvfFlat {
            nlist,
            nprobe: nprobe.min(nlist),
        })
    }

    /// Whether indexes of this kind must be trained before vectors are added.
    pub fn requires_training(&self) -> bool {
        matches!(self, IndexKind::IvfFlat { .. })
    }

    /// The topology description this kind was parsed from.
    pub fn description(&self) -> String {
        match self {
            IndexKind::Flat => "Flat".to_string(),
            IndexKind::IvfFlat { nlist, nprobe: 1 } => format!("IVF{nlist},Flat"),
            IndexKind::IvfFlat { nlist, nprobe } => format!("IVF{nlist}_{nprobe},Flat"),
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

fn parse_count(digits: &str, method: &str) -> Result<usize> {
    digits
        .parse()
        .map_err(|_| NeardupError::unsupported(format!("Invalid cell count in: {method}")))
}

/// Factory for creating vector indexes.
pub struct IndexFactory;

impl IndexFactory {
    /// Create an untrained index from a topology description.
    pub fn create(
        dimension: usize,
        method: &str,
        metric: DistanceMetric,
    ) -> Result<Box<dyn VectorIndex>> {
        Self::create_kind(dimension, IndexKind::parse_str(method)?, metric)
    }

    /// Create an untrained index, naming the metric as a string too.
    pub fn create_named(
        dimension: usize,
        method: &str,
        metric: &str,
    ) -> Result<Box<dyn VectorIndex>> {
        Self::create(dimension, method, DistanceMetric::parse_str(metric)?)
    }

    /// Create an untrained index of a known kind.
    pub fn create_kind(
        dimension: usize,
        kind: IndexKind,
        metric: DistanceMetric,
    ) -> Result<Box<dyn VectorIndex>> {
        if dimension == 0 {
            return Err(NeardupError::invalid_config(
                "index dimension must be positive",
            ));
        }

        Ok(match kind {
            IndexKind::Flat => Box::new(FlatIndex::new(dimension, metric)),
            IndexKind::IvfFlat { nlist, nprobe } => {
                Box::new(IvfFlatIndex::new(dimension, metric, nlist, nprobe))
            }
        })
    }
}
