//! Splitting the reference corpus into fixed-size contiguous batches.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{NeardupError, Result};

/// A contiguous slice `[start, end)` of the reference corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Batch {
    /// Batch number, starting at 0.
    pub number: usize,
    /// First global id in the batch.
    pub start: usize,
    /// One past the last global id in the batch.
    pub end: usize,
}

impl Batch {
    /// Offset to add to a local id to obtain the global id.
    pub fn offset(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Global id of the vector at local position `local`.
    pub fn global_id(&self, local: usize) -> usize {
        self.start + local
    }
}

/// Number of batches needed to cover `n` vectors.
pub fn batch_count(n: usize, batch_size: usize) -> usize {
    n.div_ceil(batch_size.max(1))
}

/// Cover `[0, n)` with batches of `batch_size` vectors; the last batch may be
/// smaller. Fails when `batch_size` is zero.
pub fn plan_batches(n: usize, batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(NeardupError::invalid_config(
            "batch size must be positive",
        ));
    }

    Ok((0..batch_count(n, batch_size))
        .map(|number| {
            let start = number * batch_size;
            Batch {
                number,
                start,
                end: (start + batch_size).min(n),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_cover_corpus_exactly_once() {
        for n in 0..40 {
            for batch_size in 1..12 {
                let batches = plan_batches(n, batch_size).unwrap();
                assert_eq!(batches.len(), n.div_ceil(batch_size));

                let mut expected_start = 0;
                for (i, batch) in batches.iter().enumerate() {
                    assert_eq!(batch.number, i);
                    assert_eq!(batch.start, expected_start);
                    assert_eq!(batch.offset(), i * batch_size);
                    assert!(!batch.is_empty());
                    assert!(batch.len() <= batch_size);
                    expected_start = batch.end;
                }
                assert_eq!(expected_start, n);
            }
        }
    }

    #[test]
    fn test_last_batch_is_smaller() {
        let batches = plan_batches(11, 5).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].range(), 10..11);
        assert_eq!(batches[1].global_id(3), 8);
    }

    #[test]
    fn test_empty_corpus_has_no_batches() {
        assert!(plan_batches(0, 5000).unwrap().is_empty());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(matches!(
            plan_batches(10, 0),
            Err(NeardupError::InvalidConfiguration(_))
        ));
    }
}
