//! # neardup
//!
//! Near-duplicate image detection over perceptual-hash vectors.
//!
//! ## Features
//!
//! - Exhaustive and inverted-file (k-means) vector indexes
//! - Unbatched, batched-combined and batched-separate search modes
//! - Distance normalization, thresholding and global id remapping
//! - Pluggable storage backends for persisted indexes
//! - Parallel per-batch search on a rayon worker pool
//!
//! ## Example
//!
//! ```no_run
//! use neardup::prelude::*;
//!
//! # fn main() -> neardup::error::Result<()> {
//! let references = ImageSet::from_signatures(vec![
//!     ("MonaLisa_Wikipedia.jpg".to_string(), vec![0.0; 64]),
//! ])?;
//! let queries = ImageSet::from_signatures(vec![
//!     ("MonaLisa_WikiImages.jpg".to_string(), vec![0.0; 64]),
//! ])?;
//!
//! let config = MatchConfig {
//!     batching_enabled: false,
//!     persist_indexes: false,
//!     ..MatchConfig::default()
//! };
//! let report = find_near_duplicates(&references, &queries, config)?;
//! assert_eq!(report.get("MonaLisa_WikiImages").unwrap()[0].name, "MonaLisa_Wikipedia");
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod engine;
pub mod error;
pub mod index;
pub mod matching;
pub mod storage;
pub mod vector;

use crate::engine::{MatchConfig, SearchEngine};
use crate::error::Result;
use crate::matching::MatchReport;
use crate::vector::ImageSet;

pub mod prelude {
    pub use crate::batch::{Batch, plan_batches};
    pub use crate::engine::{MatchConfig, SearchEngine, SearchMode};
    pub use crate::error::{NeardupError, Result};
    pub use crate::find_near_duplicates;
    pub use crate::index::{IndexFactory, IndexKind, Neighbor, VectorIndex};
    pub use crate::matching::{ImageMatch, MatchAggregator, MatchReport};
    pub use crate::storage::{FileStorage, MemoryStorage, Storage};
    pub use crate::vector::{DistanceMetric, HashFunction, HashMatrix, ImageSet};
}

/// Match `queries` against `references` with a one-off engine.
pub fn find_near_duplicates(
    references: &ImageSet,
    queries: &ImageSet,
    config: MatchConfig,
) -> Result<MatchReport> {
    SearchEngine::new(config)?.run(references, queries)
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
