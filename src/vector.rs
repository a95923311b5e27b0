//! Hash vectors, matrices of them, and the metrics that compare them.
//!
//! # Module Structure
//!
//! - `distance`: distance metrics (squared Euclidean, Euclidean, Manhattan, cosine)
//! - `matrix`: owned and borrowed row-major vector matrices
//! - `image_set`: image names aligned with their hash vectors

pub mod distance;
pub mod image_set;
pub mod matrix;

pub use self::distance::DistanceMetric;
pub use self::image_set::{HashFunction, ImageSet, image_stem};
pub use self::matrix::{HashMatrix, MatrixView};
