//! Record storage keyed by identity.

use alloc::vec::Vec;
use tally_core::{Error, Record, RecordId, Result};

/// Record storage backend: HashMap (O(1) lookup) or BTreeMap (ordered iteration).
#[cfg(feature = "hash-store")]
type RecordMap = hashbrown::HashMap<RecordId, Stored>;
#[cfg(not(feature = "hash-store"))]
type RecordMap = alloc::collections::BTreeMap<RecordId, Stored>;

struct Stored {
    record: Record,
    seq: u64,
}

/// Records currently in a pipeline, with their arrival sequence numbers.
///
/// The sequence number is stamped on first insert and kept across updates,
/// so pick-by ties resolve to the record that arrived first.
#[derive(Default)]
pub struct RecordStore {
    records: RecordMap,
    next_seq: u64,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new record and returns its arrival sequence number.
    pub fn insert(&mut self, record: Record) -> Result<u64> {
        let id = record.id();
        if self.records.contains_key(&id) {
            return Err(Error::duplicate_record(id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(id, Stored { record, seq });
        Ok(seq)
    }

    /// Replaces a stored record, returning the previous version and the
    /// retained sequence number.
    pub fn replace(&mut self, record: Record) -> Result<(Record, u64)> {
        let id = record.id();
        let stored = self
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::unknown_record(id))?;
        let previous = core::mem::replace(&mut stored.record, record);
        Ok((previous, stored.seq))
    }

    /// Removes a record, returning it.
    pub fn remove(&mut self, id: RecordId) -> Result<Record> {
        self.records
            .remove(&id)
            .map(|stored| stored.record)
            .ok_or_else(|| Error::unknown_record(id))
    }

    /// Gets a stored record.
    #[inline]
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id).map(|stored| &stored.record)
    }

    /// Arrival sequence number of a stored record.
    #[inline]
    pub fn seq(&self, id: RecordId) -> Option<u64> {
        self.records.get(&id).map(|stored| stored.seq)
    }

    #[inline]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over `(seq, record)` in arrival order.
    pub fn iter_by_arrival(&self) -> impl Iterator<Item = (u64, &Record)> {
        let mut entries: Vec<(u64, &Record)> = self
            .records
            .values()
            .map(|stored| (stored.seq, &stored.record))
            .collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries.into_iter()
    }
}
