//! Table files
//!
//! Immutable sorted key/value files written from a memtable flush or a
//! compaction.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "ATDT" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block                                              │
//! │   [KeyLen: u32][ValLen: u32][Key][Value] ...            │
//! │   (ValLen = u32::MAX marks a tombstone, no value bytes) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block                                             │
//! │   [KeyLen: u32][Offset: u64][Key] ...                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 | DataCRC: u32 | Padding (4)         │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{AtlasError, Result};

use super::memtable::MemTableEntry;

const MAGIC: &[u8; 4] = b"ATDT";
const VERSION: u16 = 1;
const HEADER_SIZE: u64 = 14;
const FOOTER_SIZE: u64 = 16;
const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Writes sorted entries into a new table file
///
/// Entries go to `<path>.tmp`; `finish` renames it into place, so a crash
/// mid-write never leaves a partial file under a table name.
pub struct TableWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    current_offset: u64,
    index: Vec<(Vec<u8>, u64)>,
    data_hasher: crc32fast::Hasher,
}

impl TableWriter {
    /// Create the file and write a header with a placeholder count
    pub fn create(path: &Path) -> Result<Self> {
        let tmp_path = tmp_path_for(path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer,
            entry_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append an entry; keys must arrive in ascending order
    pub fn add(&mut self, key: &[u8], entry: &MemTableEntry) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if key <= last.as_slice() {
                return Err(AtlasError::StorageFailure(format!(
                    "table keys out of order in {}",
                    self.path.display()
                )));
            }
        }
        self.index.push((key.to_vec(), self.current_offset));

        let value = match entry {
            MemTableEntry::Value(v) => Some(v.as_slice()),
            MemTableEntry::Tombstone => None,
        };
        let val_len = value.map_or(TOMBSTONE_MARKER, |v| v.len() as u32);

        let mut head = [0u8; 8];
        head[0..4].copy_from_slice(&(key.len() as u32).to_le_bytes());
        head[4..8].copy_from_slice(&val_len.to_le_bytes());

        self.writer.write_all(&head)?;
        self.writer.write_all(key)?;
        self.data_hasher.update(&head);
        self.data_hasher.update(key);
        self.current_offset += 8 + key.len() as u64;

        if let Some(v) = value {
            self.writer.write_all(v)?;
            self.data_hasher.update(v);
            self.current_offset += v.len() as u64;
        }

        self.entry_count += 1;
        Ok(())
    }

    /// Write index and footer, patch the entry count and fsync
    pub fn finish(mut self) -> Result<u64> {
        let index_offset = self.current_offset;

        for (key, offset) in &self.index {
            self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key)?;
        }

        let data_crc = self.data_hasher.finalize();
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;
        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| {
            AtlasError::StorageFailure(format!("failed to flush table file: {}", e))
        })?;
        file.seek(SeekFrom::Start(6))?;
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        Ok(self.entry_count)
    }
}

/// Reader with the whole key index held in memory
pub struct TableReader {
    id: u64,
    file: Mutex<BufReader<File>>,
    index: BTreeMap<Vec<u8>, u64>,
}

impl TableReader {
    /// Open a table file and load its index
    pub fn open(path: &Path, id: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(path, "file too short"));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(corrupt(path, "bad magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(corrupt(path, &format!("unsupported version {}", version)));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let mut offset_bytes = [0u8; 8];
        offset_bytes.copy_from_slice(&footer[0..8]);
        let index_offset = u64::from_le_bytes(offset_bytes);
        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(corrupt(path, "index offset out of range"));
        }
        let data_crc = u32::from_le_bytes([footer[8], footer[9], footer[10], footer[11]]);
        if checksum_range(&mut file, HEADER_SIZE, index_offset - HEADER_SIZE)? != data_crc {
            return Err(corrupt(path, "data checksum mismatch"));
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
        file.read_exact(&mut index_data)?;

        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos + 12 <= index_data.len() {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&index_data[pos..pos + 4]);
            let key_len = u32::from_le_bytes(len_bytes) as usize;
            let mut off_bytes = [0u8; 8];
            off_bytes.copy_from_slice(&index_data[pos + 4..pos + 12]);
            let offset = u64::from_le_bytes(off_bytes);
            pos += 12;

            let Some(key) = index_data.get(pos..pos + key_len) else {
                return Err(corrupt(path, "truncated index entry"));
            };
            index.insert(key.to_vec(), offset);
            pos += key_len;
        }

        Ok(Self {
            id,
            file: Mutex::new(BufReader::new(file)),
            index,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// `None` when the key is not in this table
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        if !self.might_contain(key) {
            return Ok(None);
        }
        match self.index.get(key) {
            Some(&offset) => Ok(Some(self.read_entry(offset)?.1)),
            None => Ok(None),
        }
    }

    /// Entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, MemTableEntry)>> {
        let offsets: Vec<u64> = self
            .index
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, &off)| off)
            .collect();

        offsets.into_iter().map(|off| self.read_entry(off)).collect()
    }

    /// Range check against the smallest and largest key
    fn might_contain(&self, key: &[u8]) -> bool {
        match (self.index.keys().next(), self.index.keys().next_back()) {
            (Some(min), Some(max)) => key >= min.as_slice() && key <= max.as_slice(),
            _ => false,
        }
    }

    fn read_entry(&self, offset: u64) -> Result<(Vec<u8>, MemTableEntry)> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut head = [0u8; 8];
        file.read_exact(&mut head)?;
        let key_len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as usize;
        let val_len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);

        let mut key = vec![0u8; key_len];
        file.read_exact(&mut key)?;

        if val_len == TOMBSTONE_MARKER {
            return Ok((key, MemTableEntry::Tombstone));
        }
        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;
        Ok((key, MemTableEntry::Value(value)))
    }
}

/// "table_000042.tbl" -> "table_000042.tbl.tmp"
fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// CRC32 of `len` bytes starting at `offset`
fn checksum_range(file: &mut File, offset: u64, len: u64) -> Result<u32> {
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = file.take(len);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

fn corrupt(path: &Path, reason: &str) -> AtlasError {
    AtlasError::StorageFailure(format!("corrupt table file {}: {}", path.display(), reason))
}
