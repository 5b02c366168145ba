//! Table Set
//!
//! Tracks the table files of one engine directory.
//!
//! ## Responsibilities
//! - Discover existing tables on open
//! - Search tables newest → oldest for reads
//! - Write new tables from memtable flushes
//! - Merge everything into one table when the count grows past a threshold

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;

use super::memtable::MemTableEntry;
use super::table::{TableReader, TableWriter};

pub struct TableSet {
    dir: PathBuf,

    /// Open readers, newest first
    tables: RwLock<Vec<TableReader>>,

    next_id: AtomicU64,
}

impl TableSet {
    /// Open or create the table directory and load every table index
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut ids: Vec<u64> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().is_some_and(|ext| ext == "tmp") {
                // left behind by a flush or compaction that never finished
                fs::remove_file(&path)?;
                debug!(path = %path.display(), "removed unfinished table");
            } else if let Some(id) = Self::parse_table_id(&path) {
                ids.push(id);
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut tables = Vec::with_capacity(ids.len());
        for id in &ids {
            tables.push(TableReader::open(&Self::table_path(dir, *id), *id)?);
        }

        let next_id = ids.first().map(|&id| id + 1).unwrap_or(1);

        Ok(Self {
            dir: dir.to_path_buf(),
            tables: RwLock::new(tables),
            next_id: AtomicU64::new(next_id),
        })
    }

    /// Newest entry for `key` across all tables
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        let tables = self.tables.read();
        for table in tables.iter() {
            if let Some(entry) = table.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Merged view of every key starting with `prefix`; newer tables win
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, MemTableEntry>> {
        let tables = self.tables.read();
        let mut merged = BTreeMap::new();
        for table in tables.iter().rev() {
            for (key, entry) in table.scan_prefix(prefix)? {
                merged.insert(key, entry);
            }
        }
        Ok(merged)
    }

    /// Write sorted entries as the newest table
    pub fn flush(&self, entries: &[(Vec<u8>, MemTableEntry)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = Self::table_path(&self.dir, id);

        let mut writer = TableWriter::create(&path)?;
        for (key, entry) in entries {
            writer.add(key, entry)?;
        }
        let count = writer.finish()?;

        let reader = TableReader::open(&path, id)?;
        self.tables.write().insert(0, reader);

        debug!(table = id, entries = count, "flushed table");
        Ok(())
    }

    /// Merge all tables into a single new one and remove the old files
    ///
    /// Tombstones are kept: if the process dies before the old files are
    /// removed, the merged table (highest id) still shadows them.
    pub fn compact(&self) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.len() < 2 {
            return Ok(());
        }

        let mut merged: BTreeMap<Vec<u8>, MemTableEntry> = BTreeMap::new();
        for table in tables.iter().rev() {
            for (key, entry) in table.scan_prefix(&[])? {
                merged.insert(key, entry);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = Self::table_path(&self.dir, id);
        let mut writer = TableWriter::create(&path)?;
        for (key, entry) in &merged {
            writer.add(key, entry)?;
        }
        writer.finish()?;

        let old_ids: Vec<u64> = tables.iter().map(|t| t.id()).collect();
        *tables = vec![TableReader::open(&path, id)?];
        drop(tables);

        for old in &old_ids {
            fs::remove_file(Self::table_path(&self.dir, *old))?;
        }

        debug!(table = id, merged = old_ids.len(), keys = merged.len(), "compacted tables");
        Ok(())
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    /// "table_000042.tbl"
    fn table_path(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("table_{:06}.tbl", id))
    }

    fn parse_table_id(path: &Path) -> Option<u64> {
        if path.extension()? != "tbl" {
            return None;
        }
        let stem = path.file_stem()?.to_string_lossy();
        stem.strip_prefix("table_")?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AtlasError;
    use tempfile::TempDir;

    fn value(v: &[u8]) -> MemTableEntry {
        MemTableEntry::Value(v.to_vec())
    }

    #[test]
    fn test_newer_table_shadows_older() {
        let dir = TempDir::new().unwrap();
        let set = TableSet::open(dir.path()).unwrap();

        set.flush(&[(b"k".to_vec(), value(b"old")), (b"x".to_vec(), value(b"1"))]).unwrap();
        set.flush(&[(b"k".to_vec(), MemTableEntry::Tombstone)]).unwrap();

        assert_eq!(set.get(b"k").unwrap(), Some(MemTableEntry::Tombstone));
        assert_eq!(set.get(b"x").unwrap(), Some(value(b"1")));
        assert_eq!(set.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_unfinished_table_is_ignored_and_removed() {
        let dir = TempDir::new().unwrap();
        {
            let set = TableSet::open(dir.path()).unwrap();
            set.flush(&[(b"k".to_vec(), value(b"v"))]).unwrap();
        }

        // a writer that never reached finish()
        let mut writer = TableWriter::create(&TableSet::table_path(dir.path(), 2)).unwrap();
        writer.add(b"k", &value(b"torn")).unwrap();
        drop(writer);
        let tmp = dir.path().join("table_000002.tbl.tmp");
        assert!(tmp.exists());
        assert!(!dir.path().join("table_000002.tbl").exists());

        let set = TableSet::open(dir.path()).unwrap();
        assert_eq!(set.table_count(), 1);
        assert_eq!(set.get(b"k").unwrap(), Some(value(b"v")));
        assert!(!tmp.exists());
    }

    #[test]
    fn test_corrupt_data_block_is_detected() {
        let dir = TempDir::new().unwrap();
        {
            let set = TableSet::open(dir.path()).unwrap();
            set.flush(&[(b"key".to_vec(), value(b"value"))]).unwrap();
        }

        let path = dir.path().join("table_000001.tbl");
        let mut bytes = fs::read(&path).unwrap();
        // first value byte: header (14) + entry head (8) + key (3)
        bytes[14 + 8 + 3] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        match TableSet::open(dir.path()) {
            Err(AtlasError::StorageFailure(message)) => assert!(message.contains("checksum")),
            Err(other) => panic!("expected StorageFailure, got {}", other),
            Ok(_) => panic!("corrupt table was accepted"),
        }
    }

    #[test]
    fn test_compaction_keeps_latest_state_and_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let set = TableSet::open(dir.path()).unwrap();
            for i in 0..5u8 {
                set.flush(&[(b"counter".to_vec(), value(&[i]))]).unwrap();
            }
            set.compact().unwrap();
            assert_eq!(set.table_count(), 1);
        }

        let set = TableSet::open(dir.path()).unwrap();
        assert_eq!(set.table_count(), 1);
        assert_eq!(set.get(b"counter").unwrap(), Some(value(&[4])));
    }
}
