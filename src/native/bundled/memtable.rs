//! MemTable
//!
//! In-memory ordered table for recent writes. It is the whole engine for
//! in-memory stores and the write buffer in front of the table files for
//! on-disk stores.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    fn footprint(&self) -> usize {
        match self {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        }
    }

    pub fn into_option(self) -> Option<Vec<u8>> {
        match self {
            MemTableEntry::Value(v) => Some(v),
            MemTableEntry::Tombstone => None,
        }
    }
}

/// BTreeMap behind a RwLock, with an approximate byte size for flush triggers
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, MemTableEntry>>,
    size: AtomicUsize,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Look up a key; a tombstone is returned as-is so callers can stop searching
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.read().get(key).cloned()
    }

    /// Insert a value, returning the new approximate size
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        self.insert(key, MemTableEntry::Value(value))
    }

    /// Insert a tombstone, returning the new approximate size
    pub fn delete(&self, key: Vec<u8>) -> usize {
        self.insert(key, MemTableEntry::Tombstone)
    }

    /// Remove a key outright (in-memory stores keep no tombstones)
    pub fn remove(&self, key: &[u8]) -> bool {
        let mut data = self.data.write();
        match data.remove(key) {
            Some(old) => {
                self.size
                    .fetch_sub(key.len() + old.footprint(), Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn insert(&self, key: Vec<u8>, entry: MemTableEntry) -> usize {
        let mut data = self.data.write();
        let added = key.len() + entry.footprint();
        let removed = match data.get(&key) {
            Some(old) => key.len() + old.footprint(),
            None => 0,
        };
        data.insert(key, entry);

        let updated = (self.size.load(Ordering::SeqCst) + added).saturating_sub(removed);
        self.size.store(updated, Ordering::SeqCst);
        updated
    }

    /// Entries whose key starts with `prefix`, in key order (tombstones included)
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, MemTableEntry)> {
        let data = self.data.read();
        data.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of all entries in key order (for flush)
    pub fn entries(&self) -> Vec<(Vec<u8>, MemTableEntry)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Clear all entries (after a successful flush)
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.clear();
        self.size.store(0, Ordering::SeqCst);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
