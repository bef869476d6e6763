//! Durable, WAL-backed storage backend.
//!
//! An append-only, CRC32-checked log where every mutation is written to
//! disk before it is applied to the in-memory index (write-before-memory-
//! update ordering). `recover()` replays the log from scratch on reopen,
//! truncating at the first checksum mismatch rather than failing the
//! whole open, tolerating a torn final write from a prior crash.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::record::{VectorId, VectorRecord};

use super::memory::MemoryBackend;
use super::mmap_view::{MmapConfig, MmapSnapshot};
use super::{BackendStats, StorageBackend, StorageResult};

/// 4-byte magic identifying an AgentDB WAL file.
pub const WAL_MAGIC: [u8; 4] = *b"ADBW";
pub const WAL_VERSION: u32 = 1;
const WAL_HEADER_SIZE: usize = 16;
const CRC_SIZE: usize = 4;
/// Payload size cap: guards against a corrupted length field causing an
/// unbounded allocation during replay.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct WalHeader {
    magic: [u8; 4],
    version: u32,
    flags: u32,
    reserved: u32,
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic: expected {expected:?}, got {actual:?}")]
    BadMagic { expected: [u8; 4], actual: [u8; 4] },
    #[error("unsupported wal version {0}")]
    UnsupportedVersion(u32),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("checksum mismatch at offset {0}")]
    ChecksumMismatch(u64),
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum WalOp {
    Insert = 1,
    Delete = 2,
}

impl WalOp {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(WalOp::Insert),
            2 => Some(WalOp::Delete),
            _ => None,
        }
    }
}

/// Appends mutation entries to the WAL file, fsyncing after every write so a
/// crash cannot lose an acknowledged insert.
pub struct WalAppender {
    file: File,
}

impl WalAppender {
    fn open(path: &Path) -> Result<Self, WalError> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        if is_new {
            let header = WalHeader {
                magic: WAL_MAGIC,
                version: WAL_VERSION,
                flags: 0,
                reserved: 0,
            };
            file.write_all(bytemuck::bytes_of(&header))?;
            file.flush()?;
        }
        Ok(Self { file })
    }

    fn append_entry(&mut self, op: WalOp, payload: &[u8]) -> Result<(), WalError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WalError::PayloadTooLarge(payload.len()));
        }
        let mut crc = crc32fast::Hasher::new();
        crc.update(&[op as u8]);
        crc.update(payload);
        let checksum = crc.finalize();

        let len = (payload.len() + 1) as u32;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&checksum.to_le_bytes())?;
        self.file.write_all(&[op as u8])?;
        self.file.write_all(payload)?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn append_insert(&mut self, record: &VectorRecord) -> Result<(), WalError> {
        self.append_entry(WalOp::Insert, &record.encode())
    }

    pub fn append_delete(&mut self, id: VectorId) -> Result<(), WalError> {
        self.append_entry(WalOp::Delete, &id.0.to_le_bytes())
    }
}

enum WalEntry {
    Insert(VectorRecord),
    Delete(VectorId),
}

/// Replays a WAL file from just past the header, stopping (without error) at
/// the first truncated or checksum-mismatched entry -- that is always the
/// tail of a file that was being written when the process crashed.
struct WalIterator<'a> {
    file: &'a mut File,
}

impl<'a> WalIterator<'a> {
    fn next_entry(&mut self) -> Result<Option<WalEntry>, WalError> {
        let mut len_buf = [0u8; 4];
        match self.file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 || len > MAX_PAYLOAD_SIZE {
            return Ok(None);
        }

        let mut crc_buf = [0u8; CRC_SIZE];
        if self.file.read_exact(&mut crc_buf).is_err() {
            return Ok(None);
        }
        let expected_crc = u32::from_le_bytes(crc_buf);

        let mut body = vec![0u8; len];
        if self.file.read_exact(&mut body).is_err() {
            return Ok(None);
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        if hasher.finalize() != expected_crc {
            return Ok(None);
        }

        let op = match WalOp::from_byte(body[0]) {
            Some(op) => op,
            None => return Err(WalError::CorruptRecord("unknown op byte".into())),
        };
        let payload = &body[1..];

        match op {
            WalOp::Insert => {
                let record = VectorRecord::decode(payload)
                    .map_err(|e| WalError::CorruptRecord(e.to_string()))?;
                Ok(Some(WalEntry::Insert(record)))
            }
            WalOp::Delete => {
                if payload.len() != 8 {
                    return Err(WalError::CorruptRecord("bad delete payload".into()));
                }
                let id = u64::from_le_bytes(payload.try_into().unwrap());
                Ok(Some(WalEntry::Delete(VectorId(id))))
            }
        }
    }
}

/// WAL-backed durable storage: every mutation is appended to the on-disk log
/// before being applied to the in-memory mirror used for reads.
pub struct PersistentBackend {
    mirror: MemoryBackend,
    appender: WalAppender,
    path: PathBuf,
}

impl PersistentBackend {
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let mut mirror = MemoryBackend::new();
        recover(path, &mut mirror)?;
        let appender = WalAppender::open(path)?;
        Ok(Self {
            mirror,
            appender,
            path: path.to_path_buf(),
        })
    }

    /// Writes a point-in-time snapshot of the live vectors next to the WAL
    /// file and opens a read-only, memory-mapped view over it, capped at
    /// `config.max_bytes`. Callers that only need nearest-neighbor lookups
    /// over a cold shard can use this instead of paying for the full
    /// in-memory mirror.
    pub fn mmap_snapshot(&self, config: MmapConfig) -> StorageResult<MmapSnapshot> {
        let dimension = self.mirror.dimension().unwrap_or(0);
        let ids = self.mirror.live_ids();
        let vectors: Vec<Option<std::borrow::Cow<'_, [f32]>>> =
            ids.iter().map(|&id| self.mirror.get_vector(id)).collect();
        let records: Vec<(VectorId, &[f32])> = ids
            .iter()
            .zip(vectors.iter())
            .filter_map(|(&id, v)| v.as_ref().map(|v| (id, v.as_ref())))
            .collect();

        let snapshot_path = self.path.with_extension("msnap");
        super::mmap_view::write_snapshot(&snapshot_path, dimension, &records).map_err(super::StorageError::MmapSnapshot)?;
        MmapSnapshot::open(&snapshot_path, dimension, &config).map_err(super::StorageError::MmapSnapshot)
    }
}

fn recover(path: &Path, mirror: &mut MemoryBackend) -> Result<(), WalError> {
    if !path.exists() {
        return Ok(());
    }
    let mut file = File::open(path)?;

    let mut header_buf = [0u8; WAL_HEADER_SIZE];
    if file.read_exact(&mut header_buf).is_err() {
        return Ok(());
    }
    let header: WalHeader = *bytemuck::from_bytes(&header_buf);
    if header.magic != WAL_MAGIC {
        return Err(WalError::BadMagic {
            expected: WAL_MAGIC,
            actual: header.magic,
        });
    }
    if header.version != WAL_VERSION {
        return Err(WalError::UnsupportedVersion(header.version));
    }

    file.seek(SeekFrom::Start(WAL_HEADER_SIZE as u64))?;
    let mut iter = WalIterator { file: &mut file };
    while let Some(entry) = iter.next_entry()? {
        match entry {
            WalEntry::Insert(record) => {
                let _ = mirror.insert(record);
            }
            WalEntry::Delete(id) => {
                let _ = mirror.delete(id);
            }
        }
    }
    Ok(())
}

impl StorageBackend for PersistentBackend {
    fn insert(&mut self, record: VectorRecord) -> StorageResult<()> {
        self.appender
            .append_insert(&record)
            .map_err(super::StorageError::Wal)?;
        self.mirror.insert(record)
    }

    fn delete(&mut self, id: VectorId) -> StorageResult<()> {
        self.appender
            .append_delete(id)
            .map_err(super::StorageError::Wal)?;
        self.mirror.delete(id)
    }

    fn get_vector(&self, id: VectorId) -> Option<std::borrow::Cow<'_, [f32]>> {
        self.mirror.get_vector(id)
    }

    fn get_record(&self, id: VectorId) -> Option<VectorRecord> {
        self.mirror.get_record(id)
    }

    fn contains(&self, id: VectorId) -> bool {
        self.mirror.contains(id)
    }

    fn is_deleted(&self, id: VectorId) -> bool {
        self.mirror.is_deleted(id)
    }

    fn len(&self) -> usize {
        self.mirror.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.mirror.dimension()
    }

    fn live_ids(&self) -> Vec<VectorId> {
        self.mirror.live_ids()
    }

    fn stats(&self) -> BackendStats {
        let on_disk_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        BackendStats { count: self.mirror.len(), on_disk_size_bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn rec(id: u64, v: Vec<f32>) -> VectorRecord {
        VectorRecord::new(VectorId(id), v, BTreeMap::new())
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard.wal");

        {
            let mut backend = PersistentBackend::open(&path).unwrap();
            backend.insert(rec(1, vec![1.0, 2.0])).unwrap();
            backend.insert(rec(2, vec![3.0, 4.0])).unwrap();
            backend.delete(VectorId(1)).unwrap();
        }

        let reopened = PersistentBackend::open(&path).unwrap();
        assert!(reopened.is_deleted(VectorId(1)));
        assert_eq!(
            reopened.get_vector(VectorId(2)).unwrap().as_ref(),
            &[3.0, 4.0]
        );
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn truncated_tail_is_dropped_without_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard.wal");
        {
            let mut backend = PersistentBackend::open(&path).unwrap();
            backend.insert(rec(1, vec![1.0])).unwrap();
        }

        // Simulate a torn write: append a few garbage bytes after a valid entry.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]).unwrap();
        }

        let reopened = PersistentBackend::open(&path).unwrap();
        assert!(reopened.contains(VectorId(1)));
    }

    #[test]
    fn mmap_snapshot_reflects_live_vectors_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard.wal");
        let mut backend = PersistentBackend::open(&path).unwrap();
        backend.insert(rec(1, vec![1.0, 2.0])).unwrap();
        backend.insert(rec(2, vec![3.0, 4.0])).unwrap();
        backend.delete(VectorId(1)).unwrap();

        let snapshot = backend.mmap_snapshot(MmapConfig::default()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains(VectorId(1)));
        assert_eq!(snapshot.get(VectorId(2)), Some(vec![3.0, 4.0]).as_deref());
    }
}
