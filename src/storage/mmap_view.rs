//! Read-only memory-mapped snapshot of a persistent backend's live vectors.
//!
//! A small fixed header (magic/version/dimension/count) is followed by an
//! id-to-offset table and a flat `f32` embeddings region, opened with
//! `memmap2::Mmap` and indexed without copying the backing file into the
//! heap. The view is explicitly size-bounded: [`MmapConfig::max_bytes`]
//! caps how large a snapshot the caller is willing to map, since the
//! durable backend's mapped view needs a tunable size bound rather than an
//! unconditional whole-file mapping.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

use crate::record::VectorId;

const MMAP_MAGIC: [u8; 4] = *b"ADBM";
const MMAP_VERSION: u32 = 1;
const HEADER_SIZE: usize = 4 + 4 + 4 + 8; // magic + version + dimension + count
const ENTRY_SIZE: usize = 8 + 8; // VectorId + offset, both u64 LE

#[derive(Debug, Error)]
pub enum MmapSnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic: {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("snapshot dimension {found} does not match expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("snapshot truncated: {0}")]
    Truncated(&'static str),
    #[error("snapshot of {actual} bytes exceeds configured max_bytes {limit}")]
    TooLarge { actual: usize, limit: usize },
}

/// Bounds how large a snapshot file the caller is willing to map into its
/// address space. `open` refuses to map a file larger than `max_bytes`
/// rather than silently mapping only a prefix, since a truncated view would
/// leave the id-to-offset table pointing past the mapped region.
#[derive(Debug, Clone, Copy)]
pub struct MmapConfig {
    pub max_bytes: usize,
}

impl Default for MmapConfig {
    fn default() -> Self {
        Self { max_bytes: 256 * 1024 * 1024 }
    }
}

/// Writes a point-in-time snapshot of `(id, vector)` pairs to `path` in the
/// flat format [`MmapSnapshot::open`] expects.
pub fn write_snapshot(path: &Path, dimension: usize, records: &[(VectorId, &[f32])]) -> Result<(), MmapSnapshotError> {
    let mut file = File::create(path)?;

    file.write_all(&MMAP_MAGIC)?;
    file.write_all(&MMAP_VERSION.to_le_bytes())?;
    file.write_all(&(dimension as u32).to_le_bytes())?;
    file.write_all(&(records.len() as u64).to_le_bytes())?;

    let mut offset = 0u64;
    for (id, vector) in records {
        file.write_all(&id.0.to_le_bytes())?;
        file.write_all(&offset.to_le_bytes())?;
        offset += vector.len() as u64;
    }
    for (_, vector) in records {
        for component in *vector {
            file.write_all(&component.to_le_bytes())?;
        }
    }
    file.sync_all()?;
    Ok(())
}

/// A read-only, memory-mapped view over a snapshot written by
/// [`write_snapshot`]. Lookups read directly out of the mapped pages; no
/// vector data is copied onto the heap.
pub struct MmapSnapshot {
    mmap: Mmap,
    dimension: usize,
    count: usize,
    offsets: HashMap<VectorId, usize>,
    embeddings_offset: usize,
}

impl MmapSnapshot {
    pub fn open(path: &Path, expected_dimension: usize, config: &MmapConfig) -> Result<Self, MmapSnapshotError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len > config.max_bytes {
            return Err(MmapSnapshotError::TooLarge { actual: len, limit: config.max_bytes });
        }

        // SAFETY: the file is opened read-only for the lifetime of this
        // mapping and is not concurrently truncated by this process.
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_SIZE {
            return Err(MmapSnapshotError::Truncated("header"));
        }

        let data = &mmap[..];
        let magic: [u8; 4] = data[0..4].try_into().unwrap();
        if magic != MMAP_MAGIC {
            return Err(MmapSnapshotError::BadMagic(magic));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if version != MMAP_VERSION {
            return Err(MmapSnapshotError::UnsupportedVersion(version));
        }
        let dimension = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
        if dimension != expected_dimension {
            return Err(MmapSnapshotError::DimensionMismatch { expected: expected_dimension, found: dimension });
        }
        let count = u64::from_le_bytes(data[12..20].try_into().unwrap()) as usize;

        let mut pos = HEADER_SIZE;
        let mut offsets = HashMap::with_capacity(count);
        for _ in 0..count {
            if pos + ENTRY_SIZE > mmap.len() {
                return Err(MmapSnapshotError::Truncated("id-to-offset table"));
            }
            let id = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
            let offset = u64::from_le_bytes(data[pos + 8..pos + 16].try_into().unwrap()) as usize;
            offsets.insert(VectorId(id), offset);
            pos += ENTRY_SIZE;
        }

        Ok(Self { mmap, dimension, count, offsets, embeddings_offset: pos })
    }

    /// Returns the vector for `id` by reading directly out of the mapped
    /// region, or `None` if `id` was not live at snapshot time.
    pub fn get(&self, id: VectorId) -> Option<&[f32]> {
        let &offset = self.offsets.get(&id)?;
        let byte_start = self.embeddings_offset + offset * 4;
        let byte_end = byte_start + self.dimension * 4;
        if byte_end > self.mmap.len() {
            return None;
        }
        let slice = &self.mmap[byte_start..byte_end];
        // SAFETY: f32 is 4 bytes wide, the file format guarantees 4-byte
        // alignment of the embeddings region, and bounds were checked above.
        Some(unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const f32, self.dimension) })
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.offsets.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_vectors_through_the_mapped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.msnap");
        let vectors: Vec<f32> = vec![1.0, 2.0, 3.0];
        let other: Vec<f32> = vec![4.0, 5.0, 6.0];
        let records = vec![(VectorId(1), vectors.as_slice()), (VectorId(2), other.as_slice())];

        write_snapshot(&path, 3, &records).unwrap();
        let snapshot = MmapSnapshot::open(&path, 3, &MmapConfig::default()).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(VectorId(1)), Some(vectors.as_slice()));
        assert_eq!(snapshot.get(VectorId(2)), Some(other.as_slice()));
        assert_eq!(snapshot.get(VectorId(99)), None);
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.msnap");
        let vectors: Vec<f32> = vec![1.0, 2.0];
        write_snapshot(&path, 2, &[(VectorId(1), vectors.as_slice())]).unwrap();

        let err = MmapSnapshot::open(&path, 3, &MmapConfig::default()).unwrap_err();
        assert!(matches!(err, MmapSnapshotError::DimensionMismatch { .. }));
    }

    #[test]
    fn refuses_to_map_a_snapshot_larger_than_the_configured_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.msnap");
        let vectors: Vec<f32> = vec![0.0; 64];
        write_snapshot(&path, 64, &[(VectorId(1), vectors.as_slice())]).unwrap();

        let tiny = MmapConfig { max_bytes: 8 };
        let err = MmapSnapshot::open(&path, 64, &tiny).unwrap_err();
        assert!(matches!(err, MmapSnapshotError::TooLarge { .. }));
    }
}
