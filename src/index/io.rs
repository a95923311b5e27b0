//! Reading and writing indexes to storage.
//!
//! File layout (little-endian):
//!
//! ```text
//! magic "NDIX" | version u32 | payload length u64 | crc32 u32 | payload
//! ```
//!
//! The payload is the bincode encoding of the index. Every failure in this
//! module surfaces as [`NeardupError::PersistenceFailure`].

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{NeardupError, Result};
use crate::index::{FlatIndex, IvfFlatIndex, VectorIndex};
use crate::storage::Storage;

const MAGIC: &[u8; 4] = b"NDIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 4 + 4 + 8 + 4;

/// Borrowed, serializable view of an index.
///
/// Encodes identically to [`IndexSnapshot`], which is what gets read back.
#[derive(Debug, Serialize)]
pub enum IndexSnapshotRef<'a> {
    Flat(&'a FlatIndex),
    Ivf(&'a IvfFlatIndex),
}

/// Owned index decoded from storage.
#[derive(Debug, Deserialize)]
pub enum IndexSnapshot {
    Flat(FlatIndex),
    Ivf(IvfFlatIndex),
}

impl IndexSnapshot {
    /// Turn the decoded snapshot into a usable index.
    pub fn into_index(self) -> Box<dyn VectorIndex> {
        match self {
            IndexSnapshot::Flat(index) => Box::new(index),
            IndexSnapshot::Ivf(index) => Box::new(index),
        }
    }
}

/// Persist `index` under `name`.
pub fn write_index(index: &dyn VectorIndex, storage: &dyn Storage, name: &str) -> Result<()> {
    encode_into(index, storage, name)
        .map_err(|e| NeardupError::persistence(format!("failed to write {name}: {e}")))
}

/// Load the index stored under `name`.
pub fn read_index(storage: &dyn Storage, name: &str) -> Result<Box<dyn VectorIndex>> {
    decode_from(storage, name)
        .map(IndexSnapshot::into_index)
        .map_err(|e| match e {
            NeardupError::PersistenceFailure(_) => e,
            other => NeardupError::persistence(format!("failed to read {name}: {other}")),
        })
}

fn encode_into(index: &dyn VectorIndex, storage: &dyn Storage, name: &str) -> Result<()> {
    let payload = bincode::serialize(&index.snapshot())?;

    let mut output = storage.create_output(name)?;
    output.write_all(MAGIC)?;
    output.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    output.write_u64::<LittleEndian>(payload.len() as u64)?;
    output.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    output.write_all(&payload)?;
    output.close()?;

    log::debug!(
        "wrote {} index {name} ({} vectors, {} bytes)",
        index.kind(),
        index.ntotal(),
        payload.len()
    );
    Ok(())
}

fn decode_from(storage: &dyn Storage, name: &str) -> Result<IndexSnapshot> {
    let mut input = storage.open_input(name)?;
    let size = input.size()?;
    if size < HEADER_LEN {
        return Err(NeardupError::persistence(format!(
            "{name} is too short to be an index file"
        )));
    }

    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(NeardupError::persistence(format!(
            "{name} is not an index file"
        )));
    }

    let version = input.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(NeardupError::persistence(format!(
            "{name} has unsupported format version {version}"
        )));
    }

    let payload_len = input.read_u64::<LittleEndian>()?;
    if payload_len != size - HEADER_LEN {
        return Err(NeardupError::persistence(format!(
            "{name} declares {payload_len} payload bytes but holds {}",
            size - HEADER_LEN
        )));
    }

    let checksum = input.read_u32::<LittleEndian>()?;
    let mut payload = vec![0u8; payload_len as usize];
    input.read_exact(&mut payload)?;
    if crc32fast::hash(&payload) != checksum {
        return Err(NeardupError::persistence(format!(
            "{name} failed checksum verification"
        )));
    }

    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexFactory;
    use crate::storage::MemoryStorage;
    use crate::vector::{DistanceMetric, HashMatrix};

    fn sample() -> HashMatrix {
        HashMatrix::from_rows(
            (0..12)
                .map(|i| vec![(i % 4) as f32, (i / 4) as f32, i as f32 * 0.5])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_flat_round_trip() {
        let storage = MemoryStorage::new();
        let data = sample();
        let mut index = IndexFactory::create(3, "Flat", DistanceMetric::SquaredEuclidean).unwrap();
        index.add(data.view()).unwrap();

        write_index(index.as_ref(), &storage, "vector.index").unwrap();
        let loaded = read_index(&storage, "vector.index").unwrap();

        assert_eq!(loaded.ntotal(), 12);
        assert_eq!(
            loaded.search(data.view(), 3).unwrap(),
            index.search(data.view(), 3).unwrap()
        );
    }

    #[test]
    fn test_ivf_round_trip_keeps_training() {
        let storage = MemoryStorage::new();
        let data = sample();
        let mut index = IndexFactory::create(3, "IVF3_2,Flat", DistanceMetric::Euclidean).unwrap();
        index.train(data.view()).unwrap();
        index.add(data.view()).unwrap();

        write_index(index.as_ref(), &storage, "vector_0.index").unwrap();
        let mut loaded = read_index(&storage, "vector_0.index").unwrap();

        assert!(loaded.is_trained());
        assert_eq!(loaded.kind(), index.kind());
        assert_eq!(loaded.metric(), DistanceMetric::Euclidean);
        assert_eq!(
            loaded.search(data.view(), 2).unwrap(),
            index.search(data.view(), 2).unwrap()
        );

        loaded.reset();
        loaded.add(data.slice(0..1)).unwrap();
        assert_eq!(loaded.ntotal(), 1);
    }

    #[test]
    fn test_corruption_is_detected() {
        let storage = MemoryStorage::new();
        let mut index = IndexFactory::create(3, "Flat", DistanceMetric::SquaredEuclidean).unwrap();
        index.add(sample().view()).unwrap();
        write_index(index.as_ref(), &storage, "vector.index").unwrap();

        let mut bytes = storage.get_bytes("vector.index").unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        storage.put_bytes("vector.index", bytes);

        let err = read_index(&storage, "vector.index").unwrap_err();
        assert!(matches!(err, NeardupError::PersistenceFailure(_)));
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_rejects_foreign_files() {
        let storage = MemoryStorage::new();
        storage.put_bytes("short.index", vec![1, 2, 3]);
        storage.put_bytes("foreign.index", vec![0u8; 64]);

        assert!(matches!(
            read_index(&storage, "short.index"),
            Err(NeardupError::PersistenceFailure(_))
        ));
        assert!(matches!(
            read_index(&storage, "foreign.index"),
            Err(NeardupError::PersistenceFailure(_))
        ));
        assert!(matches!(
            read_index(&storage, "missing.index"),
            Err(NeardupError::PersistenceFailure(_))
        ));
    }
}
