//! Row-major matrices of hash vectors.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{NeardupError, Result};

/// An owned, row-major matrix of `f32` hash vectors sharing one dimension.
///
/// A matrix with zero rows still carries its declared dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashMatrix {
    dimension: usize,
    data: Vec<f32>,
}

impl HashMatrix {
    /// Create an empty matrix of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Build a matrix from individual rows, inferring the dimension from the
    /// first row. An empty row list gives an empty matrix of dimension 0.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = rows.first().map(|row| row.len()).unwrap_or(0);
        Self::with_dimension(dimension, rows)
    }

    /// Build a matrix from individual rows that must all have `dimension` values.
    pub fn with_dimension(dimension: usize, rows: Vec<Vec<f32>>) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for row in rows {
            if row.len() != dimension {
                return Err(NeardupError::dimension_mismatch(dimension, row.len()));
            }
            data.extend_from_slice(&row);
        }

        Ok(Self { dimension, data })
    }

    /// Build a matrix from a flat row-major buffer.
    pub fn from_flat(dimension: usize, data: Vec<f32>) -> Result<Self> {
        check_flat(dimension, data.len())?;
        Ok(Self { dimension, data })
    }

    /// Append one row.
    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.dimension {
            return Err(NeardupError::dimension_mismatch(self.dimension, row.len()));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow row `i`.
    pub fn row(&self, i: usize) -> &[f32] {
        self.view().row(i)
    }

    /// Borrow the whole matrix.
    pub fn view(&self) -> MatrixView<'_> {
        MatrixView {
            dimension: self.dimension,
            data: &self.data,
        }
    }

    /// Borrow rows `range.start..range.end`.
    pub fn slice(&self, range: Range<usize>) -> MatrixView<'_> {
        self.view().slice(range)
    }

    /// The flat row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// A borrowed, row-major block of hash vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixView<'a> {
    dimension: usize,
    data: &'a [f32],
}

impl<'a> MatrixView<'a> {
    /// Wrap a flat row-major buffer.
    pub fn new(dimension: usize, data: &'a [f32]) -> Result<Self> {
        check_flat(dimension, data.len())?;
        Ok(Self { dimension, data })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow row `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    pub fn row(&self, i: usize) -> &'a [f32] {
        let start = i * self.dimension;
        &self.data[start..start + self.dimension]
    }

    /// Borrow rows `range.start..range.end`, clamped to the available rows.
    pub fn slice(&self, range: Range<usize>) -> MatrixView<'a> {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        MatrixView {
            dimension: self.dimension,
            data: &self.data[start * self.dimension..end * self.dimension],
        }
    }

    /// Iterate over rows.
    pub fn iter(self) -> impl Iterator<Item = &'a [f32]> + 'a {
        self.data.chunks_exact(self.dimension.max(1))
    }

    /// The flat row-major buffer.
    pub fn as_slice(&self) -> &'a [f32] {
        self.data
    }
}

fn check_flat(dimension: usize, len: usize) -> Result<()> {
    if dimension == 0 {
        if len != 0 {
            return Err(NeardupError::invalid_config(
                "zero-dimensional matrix cannot hold values",
            ));
        }
        return Ok(());
    }

    if len % dimension != 0 {
        return Err(NeardupError::invalid_config(format!(
            "buffer of {len} values is not a whole number of {dimension}-dimensional rows"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows() {
        let matrix = HashMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(matrix.dimension(), 2);
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.row(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        let err = HashMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(
            err,
            NeardupError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_empty_matrix_keeps_dimension() {
        let matrix = HashMatrix::new(64);
        assert!(matrix.is_empty());
        assert_eq!(matrix.len(), 0);
        assert_eq!(matrix.dimension(), 64);
        assert_eq!(matrix.view().iter().count(), 0);

        let inferred = HashMatrix::from_rows(Vec::new()).unwrap();
        assert_eq!(inferred.dimension(), 0);
        assert_eq!(inferred.len(), 0);
    }

    #[test]
    fn test_slice_and_iter() {
        let rows: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32; 3]).collect();
        let matrix = HashMatrix::from_rows(rows).unwrap();

        let view = matrix.slice(2..4);
        assert_eq!(view.len(), 2);
        assert_eq!(view.row(0), &[2.0, 2.0, 2.0]);

        let tail = matrix.slice(4..10);
        assert_eq!(tail.len(), 1);

        let firsts: Vec<f32> = matrix.view().iter().map(|row| row[0]).collect();
        assert_eq!(firsts, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_from_flat_validation() {
        assert!(HashMatrix::from_flat(3, vec![0.0; 6]).is_ok());
        assert!(HashMatrix::from_flat(3, vec![0.0; 5]).is_err());
        assert!(HashMatrix::from_flat(0, vec![1.0]).is_err());
        assert!(MatrixView::new(2, &[1.0, 2.0]).is_ok());
    }

    #[test]
    fn test_push_row() {
        let mut matrix = HashMatrix::new(2);
        matrix.push_row(&[1.0, 1.0]).unwrap();
        assert!(matrix.push_row(&[1.0]).is_err());
        assert_eq!(matrix.len(), 1);
    }
}
