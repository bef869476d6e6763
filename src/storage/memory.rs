//! Pure in-process storage backend: no durability, used for scratch shards
//! and in tests. Contiguous vector storage, `BitVec` tombstones, and a
//! monotonic id->slot index, with no WAL behind it.

use std::borrow::Cow;
use std::collections::HashMap;

use bitvec::vec::BitVec;

use crate::record::{VectorId, VectorRecord};

use super::{StorageBackend, StorageError, StorageResult};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Vec<VectorRecord>,
    index: HashMap<VectorId, usize>,
    tombstones: BitVec,
    dimension: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn insert(&mut self, record: VectorRecord) -> StorageResult<()> {
        if let Some(dim) = self.dimension {
            if record.dimension() != dim {
                return Err(StorageError::DimensionMismatch {
                    expected: dim,
                    actual: record.dimension(),
                });
            }
        } else {
            self.dimension = Some(record.dimension());
        }

        if let Some(&slot) = self.index.get(&record.id) {
            if !self.tombstones[slot] {
                return Err(StorageError::DuplicateId(record.id));
            }
            // Resurrect a previously deleted id in place: the facade's
            // upsert path deletes then re-inserts under the same id, and
            // the index never forgets a slot once assigned.
            self.tombstones.set(slot, false);
            self.records[slot] = record;
            return Ok(());
        }

        let slot = self.records.len();
        self.index.insert(record.id, slot);
        self.records.push(record);
        self.tombstones.push(false);
        Ok(())
    }

    fn delete(&mut self, id: VectorId) -> StorageResult<()> {
        if let Some(&slot) = self.index.get(&id) {
            self.tombstones.set(slot, true);
        }
        Ok(())
    }

    fn get_vector(&self, id: VectorId) -> Option<Cow<'_, [f32]>> {
        let &slot = self.index.get(&id)?;
        if self.tombstones[slot] {
            return None;
        }
        Some(Cow::Borrowed(&self.records[slot].vector))
    }

    fn get_record(&self, id: VectorId) -> Option<VectorRecord> {
        let &slot = self.index.get(&id)?;
        if self.tombstones[slot] {
            return None;
        }
        Some(self.records[slot].clone())
    }

    fn contains(&self, id: VectorId) -> bool {
        self.index.contains_key(&id)
    }

    fn is_deleted(&self, id: VectorId) -> bool {
        self.index
            .get(&id)
            .map(|&slot| self.tombstones[slot])
            .unwrap_or(false)
    }

    fn len(&self) -> usize {
        self.tombstones.iter().filter(|b| !**b).count()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn live_ids(&self) -> Vec<VectorId> {
        self.records
            .iter()
            .enumerate()
            .filter(|(slot, _)| !self.tombstones[*slot])
            .map(|(_, r)| r.id)
            .collect()
    }
}
