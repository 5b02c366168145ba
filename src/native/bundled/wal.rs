//! Write-Ahead Log
//!
//! Append-only log of mutations not yet flushed to a table file.
//!
//! ## Entry Format
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────────┐
//! │ LSN (8) │ CRC (4) │ Len (4) │ bincode(Operation)   │
//! └─────────┴─────────┴─────────┴──────────────────────┘
//! ```
//! CRC32 covers the operation bytes. Recovery stops at the first short or
//! damaged entry and truncates the file there.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// LSN (8) + CRC (4) + Len (4)
pub const ENTRY_HEADER_SIZE: usize = 16;

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// How often the WAL is fsynced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries
    EveryNEntries { count: usize },
}

/// Appends entries to the WAL file
pub struct WalWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    unsynced: usize,
}

impl WalWriter {
    /// Open (or create) the WAL for appending
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy, next_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            next_lsn,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append an operation, returning its LSN
    pub fn append(&mut self, operation: &Operation) -> Result<u64> {
        let data = bincode::serialize(operation)?;
        let lsn = self.next_lsn;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data);
        let crc = hasher.finalize();

        self.writer.write_all(&lsn.to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&(data.len() as u32).to_le_bytes())?;
        self.writer.write_all(&data)?;

        self.next_lsn += 1;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        } else {
            self.writer.flush()?;
        }

        Ok(lsn)
    }

    /// Flush buffered entries and fsync
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop every entry (their effects are durable in a table file)
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(0)?;
        file.sync_all()?;
        self.unsynced = 0;
        debug!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }
}

/// Result of a recovery pass
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Bytes removed from a damaged or partial tail
    pub bytes_truncated: u64,

    /// Last valid LSN (0 when the log was empty)
    pub last_lsn: u64,
}

/// Read every valid entry, truncating a damaged tail
pub fn recover(path: &Path) -> Result<(Vec<Operation>, RecoveryResult)> {
    let mut result = RecoveryResult::default();
    if !path.exists() {
        return Ok((Vec::new(), result));
    }

    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let mut operations = Vec::new();
    let mut pos = 0usize;

    while pos + ENTRY_HEADER_SIZE <= data.len() {
        let header = &data[pos..pos + ENTRY_HEADER_SIZE];
        let lsn = u64::from_le_bytes(fixed(&header[0..8]));
        let crc = u32::from_le_bytes(fixed(&header[8..12]));
        let len = u32::from_le_bytes(fixed(&header[12..16])) as usize;

        let start = pos + ENTRY_HEADER_SIZE;
        let Some(payload) = data.get(start..start + len) else {
            break; // partial write
        };

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != crc {
            warn!(path = %path.display(), lsn, "WAL checksum mismatch, discarding tail");
            break;
        }

        match bincode::deserialize::<Operation>(payload) {
            Ok(operation) => operations.push(operation),
            Err(e) => {
                warn!(path = %path.display(), lsn, error = %e, "undecodable WAL entry, discarding tail");
                break;
            }
        }

        result.entries_recovered += 1;
        result.last_lsn = lsn;
        pos = start + len;
    }

    if pos < data.len() {
        result.bytes_truncated = (data.len() - pos) as u64;
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(pos as u64)?;
        file.sync_all()?;
    }

    Ok((operations, result))
}

/// Copy a slice of known length into an array
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
