//! Engine
//!
//! Coordinates the WAL, memtable and table files for one open store.
//!
//! ## Concurrency Model: Single-Writer / Multiple-Reader
//!
//! - Writes (put/delete/flush) are serialized by `write_lock`
//! - Reads go to the memtable (internal RwLock) and then the tables
//! - Across processes, an on-disk engine holds an exclusive lock on
//!   `<dir>/LOCK` for as long as it is open, so only one handle per directory
//!   exists at a time

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AtlasError, Result};

use super::memtable::{MemTable, MemTableEntry};
use super::tables::TableSet;
use super::wal::{self, Operation, WalSyncStrategy, WalWriter};

/// Tuning for the bundled engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How often the WAL is fsynced
    pub wal_sync_strategy: WalSyncStrategy,

    /// Memtable size (bytes) that triggers a flush to a table file
    pub memtable_size_limit: usize,

    /// Table count above which all tables are merged into one
    pub compaction_trigger: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            compaction_trigger: 8,
        }
    }
}

/// State that only exists for on-disk engines
struct Disk {
    data_dir: PathBuf,
    wal: Mutex<WalWriter>,
    tables: TableSet,
    dir_lock: File,
}

impl Drop for Disk {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.dir_lock) {
            warn!(path = %self.data_dir.display(), error = %e, "failed to release directory lock");
        }
    }
}

pub struct Engine {
    options: EngineOptions,
    memtable: MemTable,
    disk: Option<Disk>,
    write_lock: Mutex<()>,
}

impl Engine {
    const WAL_FILENAME: &'static str = "wal.log";
    const TABLE_DIR: &'static str = "tables";
    const LOCK_FILENAME: &'static str = "LOCK";

    /// Engine holding everything in memory
    pub fn in_memory(options: EngineOptions) -> Self {
        Self {
            options,
            memtable: MemTable::new(),
            disk: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open or create an engine directory
    ///
    /// On open:
    /// 1. Create the directory and take its exclusive lock
    /// 2. Load existing tables
    /// 3. Replay the WAL, flush what it held and truncate it
    pub fn open(data_dir: &Path, options: EngineOptions) -> Result<Self> {
        fs::create_dir_all(data_dir)?;

        let lock_path = data_dir.join(Self::LOCK_FILENAME);
        let dir_lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if let Err(e) = dir_lock.try_lock_exclusive() {
            return Err(AtlasError::StorageFailure(format!(
                "cannot acquire directory lock on {}: another handle is using this store ({})",
                data_dir.display(),
                e
            )));
        }

        let tables = TableSet::open(&data_dir.join(Self::TABLE_DIR))?;
        let memtable = MemTable::new();

        let wal_path = data_dir.join(Self::WAL_FILENAME);
        let (operations, recovery) = wal::recover(&wal_path)?;
        if recovery.entries_recovered > 0 || recovery.bytes_truncated > 0 {
            info!(
                path = %wal_path.display(),
                entries = recovery.entries_recovered,
                truncated_bytes = recovery.bytes_truncated,
                last_lsn = recovery.last_lsn,
                "WAL recovery"
            );
        }
        for operation in operations {
            match operation {
                Operation::Put { key, value } => {
                    memtable.put(key, value);
                }
                Operation::Delete { key } => {
                    memtable.delete(key);
                }
            }
        }

        let mut wal = WalWriter::open(&wal_path, options.wal_sync_strategy, recovery.last_lsn + 1)?;
        if !memtable.is_empty() {
            tables.flush(&memtable.entries())?;
            memtable.clear();
        }
        wal.truncate()?;

        debug!(path = %data_dir.display(), tables = tables.table_count(), "engine opened");

        Ok(Self {
            options,
            memtable,
            disk: Some(Disk {
                data_dir: data_dir.to_path_buf(),
                wal: Mutex::new(wal),
                tables,
                dir_lock,
            }),
            write_lock: Mutex::new(()),
        })
    }

    /// Memtable first, then tables newest → oldest
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.memtable.get(key) {
            return Ok(entry.into_option());
        }
        match &self.disk {
            Some(disk) => Ok(disk.tables.get(key)?.and_then(MemTableEntry::into_option)),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        if let Some(disk) = &self.disk {
            disk.wal.lock().append(&Operation::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            })?;
        }
        let size = self.memtable.put(key.to_vec(), value.to_vec());

        self.maybe_flush(size)
    }

    /// Returns false when the key did not exist
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let _write_guard = self.write_lock.lock();

        if self.get(key)?.is_none() {
            return Ok(false);
        }

        match &self.disk {
            Some(disk) => {
                disk.wal.lock().append(&Operation::Delete { key: key.to_vec() })?;
                let size = self.memtable.delete(key.to_vec());
                self.maybe_flush(size)?;
            }
            None => {
                self.memtable.remove(key);
            }
        }
        Ok(true)
    }

    /// Live entries whose key starts with `prefix`, in key order
    pub fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, MemTableEntry> = match &self.disk {
            Some(disk) => disk.tables.scan_prefix(prefix)?,
            None => BTreeMap::new(),
        };
        for (key, entry) in self.memtable.scan_prefix(prefix) {
            merged.insert(key, entry);
        }

        Ok(merged
            .into_iter()
            .filter_map(|(k, e)| e.into_option().map(|v| (k, v)))
            .collect())
    }

    /// Make every acknowledged write durable
    pub fn sync(&self) -> Result<()> {
        if let Some(disk) = &self.disk {
            disk.wal.lock().sync()?;
        }
        Ok(())
    }

    /// Flush the memtable into a table file and truncate the WAL
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_internal()
    }

    /// Flush pending data; the directory lock is released when the engine drops
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        if let Some(disk) = &self.disk {
            disk.wal.lock().sync()?;
            debug!(path = %disk.data_dir.display(), "engine closed");
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.disk.is_none()
    }

    pub fn table_count(&self) -> usize {
        self.disk.as_ref().map_or(0, |d| d.tables.table_count())
    }

    fn maybe_flush(&self, memtable_size: usize) -> Result<()> {
        if self.disk.is_some() && memtable_size >= self.options.memtable_size_limit {
            self.flush_internal()?;
        }
        Ok(())
    }

    /// Called with `write_lock` held
    fn flush_internal(&self) -> Result<()> {
        let Some(disk) = &self.disk else {
            return Ok(());
        };
        if self.memtable.is_empty() {
            return Ok(());
        }

        disk.tables.flush(&self.memtable.entries())?;
        self.memtable.clear();
        disk.wal.lock().truncate()?;

        if disk.tables.table_count() > self.options.compaction_trigger {
            disk.tables.compact()?;
        }
        Ok(())
    }
}
