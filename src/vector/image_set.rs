//! Named sets of image hash vectors.

use crate::error::{NeardupError, Result};
use crate::vector::matrix::{HashMatrix, MatrixView};

/// Strip the final extension from an image file name.
///
/// Leading dots do not start an extension, so `".hidden"` is returned as is,
/// while `"a.b.png"` becomes `"a.b"`.
pub fn image_stem(name: &str) -> &str {
    let base_start = name.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let base = &name[base_start..];
    let leading_dots = base.len() - base.trim_start_matches('.').len();

    match base.rfind('.') {
        Some(dot) if dot >= leading_dots => &name[..base_start + dot],
        _ => name,
    }
}

/// Maps a decoded image to a fixed-length perceptual-hash vector.
///
/// Decoding and hashing live outside this crate; implementors plug their
/// extractor in here and feed the result to [`ImageSet::from_images`].
pub trait HashFunction {
    /// The decoded image type this function consumes.
    type Image;

    /// Length of every vector this function produces.
    fn dimension(&self) -> usize;

    /// Compute the hash vector of one image.
    fn hash(&self, image: &Self::Image) -> Result<Vec<f32>>;
}

/// Image names index-aligned with their hash vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSet {
    names: Vec<String>,
    hashes: HashMatrix,
}

impl ImageSet {
    /// Pair names with an already-built matrix.
    pub fn new(names: Vec<String>, hashes: HashMatrix) -> Result<Self> {
        if names.len() != hashes.len() {
            return Err(NeardupError::invalid_config(format!(
                "{} image names for {} hash vectors",
                names.len(),
                hashes.len()
            )));
        }

        Ok(Self { names, hashes })
    }

    /// An empty set whose vectors would have `dimension` values.
    pub fn empty(dimension: usize) -> Self {
        Self {
            names: Vec::new(),
            hashes: HashMatrix::new(dimension),
        }
    }

    /// Collect `(name, vector)` pairs. All vectors must share one dimension.
    pub fn from_signatures<I>(signatures: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let (names, rows): (Vec<String>, Vec<Vec<f32>>) = signatures.into_iter().unzip();
        Self::new(names, HashMatrix::from_rows(rows)?)
    }

    /// Hash `(name, image)` pairs with `hasher`.
    pub fn from_images<H, I>(hasher: &H, images: I) -> Result<Self>
    where
        H: HashFunction,
        I: IntoIterator<Item = (String, H::Image)>,
    {
        let mut names = Vec::new();
        let mut hashes = HashMatrix::new(hasher.dimension());
        for (name, image) in images {
            hashes.push_row(&hasher.hash(&image)?)?;
            names.push(name);
        }

        Ok(Self { names, hashes })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Vector dimension, as declared by the underlying matrix.
    pub fn dimension(&self) -> usize {
        self.hashes.dimension()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// File name of image `i`.
    pub fn name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(String::as_str)
    }

    /// File name of image `i` without its extension.
    pub fn stem(&self, i: usize) -> Option<&str> {
        self.name(i).map(image_stem)
    }

    pub fn hashes(&self) -> &HashMatrix {
        &self.hashes
    }

    pub fn view(&self) -> MatrixView<'_> {
        self.hashes.view()
    }
}
